use std::io::Write;

use serde::Serialize;

use crate::error::CliError;

/// Write one JSON document to stdout.
pub fn render_json<T: Serialize>(value: &T, pretty: bool) -> Result<(), CliError> {
    let rendered = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };

    let stdout = std::io::stdout();
    let mut handle = stdout.lock();
    writeln!(handle, "{rendered}")?;
    handle.flush()?;
    Ok(())
}
