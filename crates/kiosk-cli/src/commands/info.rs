use kiosk_keys::known_keys;
use kiosk_nfc::pcsc_reader::list_readers;
use kiosk_nfc::KeyRing;
use serde_json::json;

use crate::config::ReaderArgs;
use crate::formatters::FormatMode;

/// Show the reader configuration, attached PC/SC readers and the key dictionary
pub fn cmd_info(reader_args: &ReaderArgs, format_mode: FormatMode) {
    let readers = list_readers().map_err(|err| err.to_string());
    let dictionary = known_keys();
    let candidates = KeyRing::with_vendor_keys(&reader_args.extra_keys)
        .candidates()
        .len();

    if format_mode == FormatMode::Json {
        let keys: Vec<_> = dictionary
            .iter()
            .map(|k| json!({"name": k.name, "key": hex::encode_upper(k.key), "description": k.description}))
            .collect();
        println!(
            "{}",
            json!({
                "transport": format!("{:?}", reader_args.transport),
                "i2c_bus": reader_args.i2c_bus,
                "i2c_address": format!("0x{:02X}", reader_args.i2c_address),
                "pcsc_readers": readers.as_ref().ok(),
                "pcsc_error": readers.as_ref().err(),
                "key_candidates": candidates,
                "dictionary": keys,
            })
        );
        return;
    }

    println!("=== Reader ===\n");
    println!("Transport: {:?}", reader_args.transport);
    println!(
        "PN532: I2C bus {} address 0x{:02X}",
        reader_args.i2c_bus, reader_args.i2c_address
    );
    println!(
        "Polling: every {} ms, detect timeout {} ms\n",
        reader_args.poll_interval_ms, reader_args.detect_timeout_ms
    );

    println!("=== PC/SC Readers ===\n");
    match &readers {
        Ok(names) if names.is_empty() => println!("No PC/SC readers found\n"),
        Ok(names) => {
            for (i, name) in names.iter().enumerate() {
                println!("{}. {}", i + 1, name);
            }
            println!();
        }
        Err(err) => println!("PC/SC unavailable: {}\n", err),
    }

    println!("=== Keys ===\n");
    println!(
        "{} site key(s), {} key/slot candidates per sector",
        reader_args.extra_keys.len(),
        candidates
    );
    println!("Dictionary ({} keys):", dictionary.len());
    for key in &dictionary {
        println!(
            "  {:<16} {}  {}",
            key.name,
            hex::encode_upper(key.key),
            key.description
        );
    }
}
