use bloodline_core::*;
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "bloodline")]
#[command(about = "Blood donation registry and hospital inventory", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Override data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Print records as JSON instead of text
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Register donors and inspect their records
    #[command(subcommand)]
    Donor(DonorCommand),

    /// Book a donation for a registered donor
    Schedule {
        donor: String,

        #[arg(long)]
        hospital: String,

        /// Donation time (RFC 3339, e.g. 2025-03-01T09:00:00Z)
        #[arg(long, value_parser = parse_time)]
        at: DateTime<Utc>,

        #[arg(long, default_value = "")]
        notes: String,
    },

    /// Mark a scheduled donation as done
    Complete {
        donor: String,

        /// Time the donation was booked for (RFC 3339)
        #[arg(long, value_parser = parse_time)]
        at: DateTime<Utc>,
    },

    /// Create and decide blood requests
    #[command(subcommand)]
    Request(RequestCommand),

    /// Inspect and correct hospital inventory
    #[command(subcommand)]
    Inventory(InventoryCommand),

    /// Export records to CSV
    #[command(subcommand)]
    Export(ExportCommand),

    /// Fold the ledger log into a snapshot
    Compact {
        /// Remove archived logs afterwards
        #[arg(long)]
        cleanup: bool,
    },
}

#[derive(Subcommand)]
enum DonorCommand {
    Register {
        identity: String,

        #[arg(long)]
        blood_group: BloodGroup,
    },
    Show {
        identity: String,
    },
    History {
        identity: String,
    },
}

#[derive(Subcommand)]
enum RequestCommand {
    Create {
        #[arg(long)]
        recipient: String,

        #[arg(long)]
        hospital: String,

        #[arg(long)]
        blood_group: BloodGroup,

        #[arg(long, allow_negative_numbers = true)]
        units: i64,

        /// normal, urgent or emergency
        #[arg(long, default_value = "normal")]
        urgency: Urgency,
    },
    Approve {
        id: RequestId,
    },
    Fulfill {
        id: RequestId,
    },
    Reject {
        id: RequestId,

        #[arg(long)]
        reason: String,
    },
    List {
        #[arg(long)]
        recipient: Option<String>,

        #[arg(long)]
        hospital: Option<String>,

        /// PENDING, APPROVED, FULFILLED or REJECTED
        #[arg(long)]
        status: Option<RequestStatus>,
    },
}

#[derive(Args)]
struct RecordArgs {
    #[arg(long)]
    hospital: String,

    #[arg(long)]
    blood_group: BloodGroup,
}

#[derive(Subcommand)]
enum InventoryCommand {
    /// Override the unit count
    Set {
        #[command(flatten)]
        record: RecordArgs,

        #[arg(long, allow_negative_numbers = true)]
        units: i64,
    },
    /// Add or remove units
    Adjust {
        #[command(flatten)]
        record: RecordArgs,

        #[arg(long, allow_negative_numbers = true)]
        delta: i64,
    },
    Show {
        #[arg(long)]
        hospital: String,
    },
}

#[derive(Subcommand)]
enum ExportCommand {
    History {
        donor: String,

        #[arg(long)]
        output: PathBuf,
    },
    Inventory {
        #[arg(long)]
        hospital: String,

        #[arg(long)]
        output: PathBuf,
    },
}

fn main() -> ExitCode {
    bloodline_core::logging::init_with_level("warn");

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    let data_dir = cli.data_dir.unwrap_or_else(|| config.data.data_dir.clone());
    let ledger_dir = data_dir.join("ledger");
    tracing::debug!("Using ledger at {:?}", ledger_dir);

    if let Commands::Compact { cleanup } = cli.command {
        return cmd_compact(&ledger_dir, cleanup);
    }

    let ledger = Arc::new(JsonlLedger::open(&ledger_dir)?);
    let bank = BloodBank::with_clock(ledger, Arc::new(SystemClock), config.policy());
    bank.subscribe(Arc::new(LoggingObserver));

    let out = Output { json: cli.json };
    match cli.command {
        Commands::Donor(command) => cmd_donor(&bank, &out, command),
        Commands::Schedule {
            donor,
            hospital,
            at,
            notes,
        } => {
            let donation = bank.schedule_donation(
                &Identity::from(donor.as_str()),
                HospitalRef::from(hospital.as_str()),
                &notes,
                at,
            )?;
            out.show(&donation, || {
                println!(
                    "✓ Scheduled donation for {} at {} on {}",
                    donation.donor,
                    donation.hospital,
                    donation.scheduled_for.to_rfc3339()
                );
            })
        }
        Commands::Complete { donor, at } => {
            let identity = Identity::from(donor.as_str());
            let donation = bank.complete_scheduled_donation(&identity, at)?;
            let record = bank.get_donor(&identity)?;
            out.show(&donation, || {
                println!(
                    "✓ Donation completed (+{} points, total {})",
                    donation.points_earned, record.reward_points
                );
            })
        }
        Commands::Request(command) => cmd_request(&bank, &out, command),
        Commands::Inventory(command) => cmd_inventory(&bank, &out, command),
        Commands::Export(command) => cmd_export(&bank, command),
        Commands::Compact { .. } => Ok(()),
    }
}

/// Text or JSON rendering of command results
struct Output {
    json: bool,
}

impl Output {
    fn show<T: Serialize>(&self, value: &T, text: impl FnOnce()) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            text();
        }
        Ok(())
    }
}

fn cmd_donor(bank: &BloodBank, out: &Output, command: DonorCommand) -> Result<()> {
    match command {
        DonorCommand::Register {
            identity,
            blood_group,
        } => {
            let donor = bank.register_donor(Identity::from(identity.as_str()), blood_group)?;
            out.show(&donor, || {
                println!("✓ Registered donor {} ({})", donor.address, donor.blood_group);
            })
        }
        DonorCommand::Show { identity } => {
            let status = bank.donor_status(&Identity::from(identity.as_str()))?;
            out.show(&status, || display_status(&status))
        }
        DonorCommand::History { identity } => {
            let history = bank.donation_history(&Identity::from(identity.as_str()))?;
            out.show(&history, || {
                if history.is_empty() {
                    println!("No donations scheduled.");
                }
                for entry in &history {
                    println!(
                        "  {}  {:<10} {:<12} +{:<3} {}",
                        entry.scheduled_for.to_rfc3339(),
                        entry.status.to_string(),
                        entry.hospital.to_string(),
                        entry.points_earned,
                        entry.notes
                    );
                }
            })
        }
    }
}

fn cmd_request(bank: &BloodBank, out: &Output, command: RequestCommand) -> Result<()> {
    let request = match command {
        RequestCommand::Create {
            recipient,
            hospital,
            blood_group,
            units,
            urgency,
        } => bank.create_request(
            Identity::from(recipient.as_str()),
            HospitalRef::from(hospital.as_str()),
            blood_group,
            units,
            urgency,
        )?,
        RequestCommand::Approve { id } => bank.approve_request(id)?,
        RequestCommand::Fulfill { id } => bank.fulfill_request(id)?,
        RequestCommand::Reject { id, reason } => bank.reject_request(id, &reason)?,
        RequestCommand::List {
            recipient,
            hospital,
            status,
        } => {
            let filter = RequestFilter {
                recipient: recipient.as_deref().map(Identity::from),
                hospital: hospital.as_deref().map(HospitalRef::from),
                status,
            };
            let requests = bank.list_requests(&filter)?;
            return out.show(&requests, || {
                if requests.is_empty() {
                    println!("No matching requests.");
                }
                for request in &requests {
                    display_request(request);
                }
            });
        }
    };

    out.show(&request, || display_request(&request))
}

fn cmd_inventory(bank: &BloodBank, out: &Output, command: InventoryCommand) -> Result<()> {
    let record = match command {
        InventoryCommand::Set { record, units } => {
            bank.set_units(&HospitalRef::from(record.hospital.as_str()), record.blood_group, units)?
        }
        InventoryCommand::Adjust { record, delta } => {
            bank.adjust_units(&HospitalRef::from(record.hospital.as_str()), record.blood_group, delta)?
        }
        InventoryCommand::Show { hospital } => {
            let hospital = HospitalRef::from(hospital.as_str());
            let records = bank.hospital_inventory(&hospital)?;
            return out.show(&records, || {
                println!("Inventory at {}:", hospital);
                for group in BloodGroup::ALL {
                    let units = records
                        .iter()
                        .find(|record| record.blood_group == group)
                        .map_or(0, |record| record.units);
                    println!("  {:<4} {:>5} units", group.to_string(), units);
                }
            });
        }
    };

    out.show(&record, || {
        println!(
            "✓ {} at {} now {} units",
            record.blood_group, record.hospital, record.units
        );
    })
}

fn cmd_export(bank: &BloodBank, command: ExportCommand) -> Result<()> {
    match command {
        ExportCommand::History { donor, output } => {
            let history = bank.donation_history(&Identity::from(donor.as_str()))?;
            let count = export::write_history_csv(&history, &output)?;
            println!("✓ Exported {} donations to {}", count, output.display());
        }
        ExportCommand::Inventory { hospital, output } => {
            let records = bank.hospital_inventory(&HospitalRef::from(hospital.as_str()))?;
            let count = export::write_inventory_csv(&records, &output)?;
            println!("✓ Exported {} inventory records to {}", count, output.display());
        }
    }
    Ok(())
}

fn cmd_compact(ledger_dir: &Path, cleanup: bool) -> Result<()> {
    if !ledger_dir.join("ledger.wal").exists() {
        println!("No ledger log found - nothing to compact.");
        return Ok(());
    }

    let ledger = JsonlLedger::open(ledger_dir)?;
    let sequence = ledger.compact()?;
    println!("✓ Compacted ledger at sequence {}", sequence);
    println!("  Snapshot: {}", ledger.snapshot_path().display());

    if cleanup {
        let cleaned = wal::cleanup_processed_logs(ledger_dir)?;
        if cleaned > 0 {
            println!("✓ Cleaned up {} processed logs", cleaned);
        }
    }

    Ok(())
}

fn display_status(status: &DonorStatus) {
    let donor = &status.donor;
    println!("\nDonor {}", donor.address);
    println!("  Blood group:   {}", donor.blood_group);
    println!("  Reward points: {} ({})", donor.reward_points, status.tier);
    match donor.last_donation_time {
        Some(last) => println!("  Last donation: {}", last.to_rfc3339()),
        None => println!("  Last donation: never"),
    }
    match status.next_eligible_at {
        Some(next) => println!("  Eligible from: {}", next.to_rfc3339()),
        None => println!("  Eligible from: now"),
    }
    println!("  Pending:       {}", status.pending_donations);
}

fn display_request(request: &BloodRequest) {
    println!(
        "{}  {:<9} {} x{} at {} for {} ({})",
        request.id,
        request.status.to_string(),
        request.blood_group,
        request.units,
        request.hospital,
        request.recipient,
        request.urgency
    );
    if let Some(reason) = &request.rejection_reason {
        println!("    reason: {}", reason);
    }
}

fn parse_time(s: &str) -> std::result::Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("invalid RFC 3339 time '{}': {}", s, e))
}
