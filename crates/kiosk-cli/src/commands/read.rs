use std::time::Duration;

use crate::backend::BackendClient;
use crate::config::ReaderArgs;
use crate::formatters::{format_session, FormatMode};
use crate::routing::route_session;

use super::{open_reader, wait_for_card};

/// Read one card and, with a backend configured, show where it routes
pub fn cmd_read(
    reader_args: &ReaderArgs,
    backend: Option<&BackendClient>,
    wait: Duration,
    format_mode: FormatMode,
) {
    let Some(mut reader) = open_reader(reader_args) else {
        return;
    };
    let Some(uid) = wait_for_card(&mut reader, wait) else {
        return;
    };

    let session = reader.read_session(&uid);
    let route = backend.map(|backend| route_session(&session, backend));

    println!("{}", format_session(&session, route.as_ref(), format_mode));
}
