use std::time::Duration;

use kiosk_common::CLASSIC_1K_BLOCKS;
use kiosk_nfc::CardFamily;

use crate::config::ReaderArgs;
use crate::formatters::{format_trailer, FormatMode};

use super::{open_reader, wait_for_card};

/// Dump sector trailers of a MIFARE Classic card (all sectors if none given)
pub fn cmd_inspect(reader_args: &ReaderArgs, sectors: &[u8], wait: Duration, format_mode: FormatMode) {
    let Some(mut reader) = open_reader(reader_args) else {
        return;
    };
    let Some(uid) = wait_for_card(&mut reader, wait) else {
        return;
    };

    if CardFamily::from_uid(&uid) != CardFamily::Classic {
        eprintln!("Card {} is not a MIFARE Classic card, it has no sector trailers", uid);
        return;
    }

    let sector_count = CLASSIC_1K_BLOCKS / 4;
    let sectors: Vec<u8> = if sectors.is_empty() {
        (0..sector_count).collect()
    } else {
        sectors.to_vec()
    };

    if format_mode == FormatMode::Human {
        println!("Card {}\n", uid);
    }

    for sector in sectors {
        if sector >= sector_count {
            eprintln!("Sector {} does not exist on a 1K card", sector);
            continue;
        }
        match reader.read_trailer(&uid, sector) {
            Ok(Some(trailer)) => {
                println!("{}", format_trailer(sector, &trailer, format_mode));
                if format_mode == FormatMode::Human {
                    println!();
                }
            }
            Ok(None) => eprintln!("Sector {}: no known key opens it\n", sector),
            Err(err) => {
                eprintln!("Reader error on sector {}: {}", sector, err);
                return;
            }
        }
    }
}
