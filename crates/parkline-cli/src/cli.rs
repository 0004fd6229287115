use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use parkline_core::models::{InfractionType, PaymentMethod, VehicleType};

#[derive(Parser)]
#[command(name = "parkline")]
#[command(about = "Record enforcement writes offline and sync them when the network is back")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local queue database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Optional path to JSON config file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Skip the reachability probe and treat the network as down
    #[arg(long, global = true)]
    pub offline: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Register or look up vehicles
    Vehicle {
        #[command(subcommand)]
        command: VehicleCommands,
    },
    /// Issue parking tickets
    Ticket {
        #[command(subcommand)]
        command: TicketCommands,
    },
    /// File infractions and attach photos
    Infraction {
        #[command(subcommand)]
        command: InfractionCommands,
    },
    /// Submit queued records to the remote now
    Sync {
        /// Output the session summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show queue counts, connectivity and the last sync session
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show or change the forced-offline override
    Offline {
        #[command(subcommand)]
        command: Option<OfflineCommands>,
    },
    /// Inspect or requeue records that exhausted their retries
    DeadLetter {
        #[command(subcommand)]
        command: DeadLetterCommands,
    },
    /// Probe connectivity and sync automatically until interrupted
    Watch,
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum VehicleCommands {
    /// Register a vehicle
    Register(VehicleArgs),
    /// Look up a vehicle by plate (falls back to queued registrations)
    Search {
        plate: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args)]
pub struct VehicleArgs {
    pub plate: String,
    #[arg(long = "type", value_enum, default_value_t = VehicleTypeArg::Car)]
    pub vehicle_type: VehicleTypeArg,
    #[arg(long, value_name = "NAME")]
    pub owner_name: Option<String>,
    #[arg(long, value_name = "DOCUMENT")]
    pub owner_document: Option<String>,
}

#[derive(Subcommand)]
pub enum TicketCommands {
    /// Issue a ticket
    Create(TicketArgs),
}

#[derive(Args)]
pub struct TicketArgs {
    pub plate: String,
    #[arg(long)]
    pub zone: u32,
    /// Paid duration in minutes
    #[arg(long)]
    pub duration: u32,
    #[arg(long, value_enum, default_value_t = PaymentMethodArg::Pix)]
    pub payment: PaymentMethodArg,
    #[arg(long)]
    pub amount: f64,
}

#[derive(Subcommand)]
pub enum InfractionCommands {
    /// File an infraction
    Create(InfractionArgs),
    /// Upload photos for an infraction the remote already holds
    Photos {
        /// Remote infraction id
        infraction_id: u64,
        /// Image files
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

#[derive(Args)]
pub struct InfractionArgs {
    pub plate: String,
    #[arg(long, value_name = "ID")]
    pub agent: u32,
    #[arg(long)]
    pub zone: u32,
    #[arg(long = "type", value_enum)]
    pub infraction_type: InfractionTypeArg,
    /// Observation time, RFC 3339 (defaults to now)
    #[arg(long, value_name = "TIMESTAMP")]
    pub start: Option<String>,
    #[arg(long, allow_negative_numbers = true)]
    pub lat: Option<f64>,
    #[arg(long, allow_negative_numbers = true)]
    pub lng: Option<f64>,
    #[arg(long)]
    pub observations: Option<String>,
    /// Already uploaded photo URL (repeatable)
    #[arg(long = "photo-url", value_name = "URL")]
    pub photo_urls: Vec<String>,
}

#[derive(Subcommand)]
pub enum OfflineCommands {
    /// Force offline mode
    On,
    /// Clear forced offline mode
    Off,
    /// Show the current override
    Show,
}

#[derive(Subcommand)]
pub enum DeadLetterCommands {
    /// List dead-lettered records
    List {
        /// Limit to one kind
        #[arg(long)]
        kind: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Return dead-lettered records to the pending queue
    Retry {
        /// Limit to one kind
        #[arg(long)]
        kind: Option<String>,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum VehicleTypeArg {
    Car,
    Motorcycle,
    Truck,
}

impl From<VehicleTypeArg> for VehicleType {
    fn from(value: VehicleTypeArg) -> Self {
        match value {
            VehicleTypeArg::Car => Self::Car,
            VehicleTypeArg::Motorcycle => Self::Motorcycle,
            VehicleTypeArg::Truck => Self::Truck,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum PaymentMethodArg {
    Pix,
    QrCode,
    CreditCard,
}

impl From<PaymentMethodArg> for PaymentMethod {
    fn from(value: PaymentMethodArg) -> Self {
        match value {
            PaymentMethodArg::Pix => Self::Pix,
            PaymentMethodArg::QrCode => Self::QrCode,
            PaymentMethodArg::CreditCard => Self::CreditCard,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum InfractionTypeArg {
    NoPayment,
    ExpiredTicket,
    ForbiddenZone,
    UnregisteredVehicle,
}

impl From<InfractionTypeArg> for InfractionType {
    fn from(value: InfractionTypeArg) -> Self {
        match value {
            InfractionTypeArg::NoPayment => Self::NoPayment,
            InfractionTypeArg::ExpiredTicket => Self::ExpiredTicket,
            InfractionTypeArg::ForbiddenZone => Self::ForbiddenZone,
            InfractionTypeArg::UnregisteredVehicle => Self::UnregisteredVehicle,
        }
    }
}
