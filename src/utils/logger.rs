use std::fs::OpenOptions;
use std::io::Error as IOError;
use std::path::Path;

use env_logger::{Env, Target, WriteStyle};

/// `RUST_LOG` wins over `level`; with `file` the output is appended there without colors
pub fn init_logger(level: &str, file: Option<&Path>) -> Result<(), IOError> {
    let mut builder = env_logger::Builder::from_env(Env::default().default_filter_or(level));
    builder.format_timestamp_secs();

    match file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            builder
                .write_style(WriteStyle::Never)
                .target(Target::Pipe(Box::new(file)));
        }
        None => {
            builder.write_style(WriteStyle::Always);
        }
    }

    builder.init();
    Ok(())
}
