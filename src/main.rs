use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use hl7_adt_link::{
    Acknowledgment, Config, Listener, MemoryDirectory, PatientRecord, Router, SnapshotBroadcaster,
};
use log::{info, warn};
use std::error::Error;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

#[derive(Parser)]
#[command(name = "hl7-adt")]
#[command(about = "HL7 ADT^A01/A03 exchange over MLLP", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HIS side: accept ADT messages and keep the patient list
    Listen {
        /// Port to bind (defaults to HL7_LISTEN_PORT or 2575)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Send an ADT^A01 for a patient
    Admit {
        #[command(flatten)]
        patient: PatientArgs,
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Send an ADT^A03 for a patient
    Discharge {
        #[command(flatten)]
        patient: PatientArgs,
        #[command(flatten)]
        target: TargetArgs,
    },
}

#[derive(clap::Args)]
struct PatientArgs {
    #[arg(long)]
    id: u64,
    #[arg(long)]
    first: String,
    #[arg(long)]
    last: String,
    /// Date of birth, YYYY-MM-DD
    #[arg(long)]
    dob: NaiveDate,
}

#[derive(clap::Args)]
struct TargetArgs {
    /// HIS host (defaults to HL7_SERVER_HOST or localhost)
    #[arg(long)]
    host: Option<String>,
    /// HIS port (defaults to HL7_SERVER_PORT or 2575)
    #[arg(long)]
    port: Option<u16>,
    /// Exchange timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,
}

impl From<PatientArgs> for PatientRecord {
    fn from(args: PatientArgs) -> Self {
        PatientRecord::new(args.id, args.first, args.last, args.dob)
    }
}

impl TargetArgs {
    fn apply(self, config: &mut Config) {
        if let Some(host) = self.host {
            config.server_host = host;
        }
        if let Some(port) = self.port {
            config.server_port = port;
        }
        if let Some(timeout_ms) = self.timeout_ms {
            config.timeout = Duration::from_millis(timeout_ms);
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let mut config = Config::from_env()?;

    match cli.command {
        Commands::Listen { port } => {
            if let Some(port) = port {
                config.listen_port = port;
            }
            listen(config).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Admit { patient, target } => {
            target.apply(&mut config);
            let ack = config.session().admit(&patient.into()).await?;
            Ok(report(&ack))
        }
        Commands::Discharge { patient, target } => {
            target.apply(&mut config);
            let ack = config.session().discharge(&patient.into()).await?;
            Ok(report(&ack))
        }
    }
}

fn report(ack: &Acknowledgment) -> ExitCode {
    match &ack.reason {
        Some(reason) => println!("{}: {}", ack.outcome, reason),
        None => println!("{}", ack.outcome),
    }
    if ack.is_accepted() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

async fn listen(config: Config) -> Result<(), Box<dyn Error>> {
    let broadcaster = SnapshotBroadcaster::new(16);
    let router = Router::new(
        Arc::new(MemoryDirectory::new()),
        Arc::new(broadcaster.clone()),
    );

    // stands in for the real-time channel the web clients subscribe to
    let mut updates = broadcaster.subscribe();
    tokio::spawn(async move {
        loop {
            match updates.recv().await {
                Ok(snapshot) => info!("Patient list updated ({} patients)", snapshot.len()),
                Err(RecvError::Lagged(missed)) => warn!("Skipped {} patient list updates", missed),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let listener = Listener::bind(config.listen_addr(), Arc::new(router), config.routing.reversed())
        .await?
        .with_read_timeout(config.read_timeout)
        .with_max_frame_length(config.max_frame_length);
    info!("HL7 server listening on {}", listener.local_addr()?);

    listener.run().await;
    Ok(())
}
