use std::path::{Path, PathBuf};

use clap::{Parser, ValueEnum};
use url::Url;

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for log::LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

#[derive(Parser, Debug)]
#[clap(version, about)]
pub struct Cli {
    #[clap(value_parser, help = "The WSDL or XSD to flatten, as a file path or URL")]
    pub url: String,

    #[clap(
        long,
        value_enum,
        env = "LOG_LEVEL",
        default_value = "info",
        ignore_case = true
    )]
    pub log_level: LogLevel,

    #[clap(
        long,
        value_parser,
        help = "PEM file with the client certificate and key for HTTPS"
    )]
    pub client_cert: Option<PathBuf>,

    #[clap(long, hide = true)]
    pub keep_clark: bool,

    #[clap(long, help = "Rewrite constructs zeep cannot handle")]
    pub zeep: bool,

    #[clap(long, help = "Allow a XML Document Type Definition (DTD) to occur")]
    pub allow_dtd: bool,

    #[clap(long, value_parser, value_name = "SECONDS", help = "Timeout per request")]
    pub timeout: Option<u64>,
}

/// Turns the positional argument into an absolute URL. Anything without a scheme is a local path.
pub fn resolve_input(input: &str) -> Result<String, String> {
    if let Ok(url) = Url::parse(input) {
        // a single letter scheme is a Windows drive
        if url.scheme().len() > 1 {
            return Ok(url.into());
        }
    }
    let path = Path::new(input)
        .canonicalize()
        .map_err(|err| format!("{input}: {err}"))?;
    Url::from_file_path(&path)
        .map(String::from)
        .map_err(|()| format!("{} is not an absolute path", path.display()))
}
