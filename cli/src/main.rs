mod cli;

use std::{error::Error, io::Write, process::ExitCode, time::Duration};

use clap::Parser;
use dt_wsdl::{
    flatten, Compatibility, FlattenOptions, HttpTransport, NamespaceNotation, TransportOptions,
};
use log::{error, info};

use cli::Cli;

fn main() -> ExitCode {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(cli.log_level.into())
        .target(env_logger::Target::Stderr)
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let mut message = err.to_string();
            let mut source = err.source();
            while let Some(cause) = source {
                message.push_str(&format!(": {cause}"));
                source = cause.source();
            }
            error!("{message}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    let url = cli::resolve_input(&cli.url)?;
    let transport = HttpTransport::new(&TransportOptions {
        client_certificate: cli.client_cert,
        timeout: cli.timeout.map(Duration::from_secs),
    })?;

    let options = FlattenOptions {
        notation: if cli.keep_clark {
            NamespaceNotation::Clark
        } else {
            NamespaceNotation::Prefixed
        },
        compatibility: if cli.zeep {
            Compatibility::Zeep
        } else {
            Compatibility::AsIs
        },
        allow_dtd: cli.allow_dtd,
        ..FlattenOptions::default()
    };
    let flattened = flatten(transport, &url, &options)?;
    for diagnostic in &flattened.report.diagnostics {
        info!("{}: {diagnostic}", flattened.url);
    }

    let mut stdout = std::io::stdout().lock();
    flattened.document.write_xml(&mut stdout)?;
    writeln!(stdout)?;
    Ok(())
}
