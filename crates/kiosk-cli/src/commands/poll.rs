use kiosk_nfc::PollingLoop;
use tracing::info;

use crate::backend::BackendClient;
use crate::config::ReaderArgs;
use crate::formatters::{format_session, FormatMode};
use crate::routing::route_session;

use super::open_reader;

/// Run the kiosk polling loop, printing each tap as it arrives
pub fn cmd_poll(
    reader_args: &ReaderArgs,
    backend: Option<&BackendClient>,
    once: bool,
    format_mode: FormatMode,
) {
    let Some(reader) = open_reader(reader_args) else {
        return;
    };

    let (mut polling, sessions) = PollingLoop::with_channel(reader, reader_args.polling_config());
    polling.start();
    if format_mode == FormatMode::Human {
        println!("Polling for cards (Ctrl+C to quit)\n");
    }

    for session in sessions.iter() {
        let route = backend.map(|backend| route_session(&session, backend));
        println!("{}", format_session(&session, route.as_ref(), format_mode));
        if format_mode == FormatMode::Human {
            println!();
        }
        if once {
            break;
        }
    }

    polling.stop();
    info!(stats = %polling.stats(), "Polling stopped");
}
