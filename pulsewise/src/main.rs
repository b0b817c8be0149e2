//! pulsewise - conversational check-in agents for HR teams
//!
//! Command-line front end over pulsewise-core. The caller's identity comes
//! from `--company`, `--user` and `--role`; in production these are supplied by
//! the identity service sitting in front of the engine.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Database: $XDG_DATA_HOME/pulsewise/data.db (~/.local/share/pulsewise/data.db)
//! - Logs: $XDG_STATE_HOME/pulsewise/pulsewise.log (~/.local/state/pulsewise/pulsewise.log)
//! - Config: $XDG_CONFIG_HOME/pulsewise/config.toml (~/.config/pulsewise/config.toml)

mod output;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand, ValueEnum};
use pulsewise_core::seed::{self, DEMO_ADMIN_ID};
use pulsewise_core::types::{
    Cadence, ConversationStatus, EscalationStatus, InstanceStatus, Principal, ScheduleSpec,
};
use pulsewise_core::{
    AgentRegistry, Analytics, Config, ConversationFilter, Database, NewInstance, Orchestrator,
};

#[derive(Parser)]
#[command(name = "pulsewise")]
#[command(about = "Conversational check-in agents for HR teams")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    identity: Identity,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct Identity {
    /// Company the caller belongs to
    #[arg(long, global = true, default_value = "demo")]
    company: String,

    /// Caller's user id
    #[arg(long, global = true, default_value = DEMO_ADMIN_ID)]
    user: String,

    /// Caller's role
    #[arg(long, global = true, value_enum, default_value_t = RoleArg::Admin)]
    role: RoleArg,
}

#[derive(Clone, Copy, ValueEnum)]
enum RoleArg {
    Admin,
    Employee,
}

impl Identity {
    fn principal(&self) -> Principal {
        match self.role {
            RoleArg::Admin => Principal::admin(&self.user, &self.company),
            RoleArg::Employee => Principal::employee(&self.user, &self.company),
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Install system templates, optionally with a demo employee directory
    Seed {
        /// Also load the demo directory into --company
        #[arg(long)]
        demo: bool,
    },
    /// List the system templates
    Templates,
    /// Manage agent instances
    #[command(subcommand)]
    Instance(InstanceCommand),
    /// Run an instance now against its audience
    Run { instance_id: String },
    /// Run every instance whose schedule is due
    Tick,
    /// Send a message as the conversation's participant
    Reply {
        conversation_id: String,
        message: String,
    },
    /// Inspect and manage conversations
    #[command(subcommand)]
    Conversation(ConversationCommand),
    /// List escalations for the company
    Escalations {
        /// Only open escalations
        #[arg(long)]
        open: bool,
    },
    /// Company dashboard numbers
    Analytics {
        /// Narrow to one instance
        #[arg(long)]
        instance: Option<String>,
    },
}

#[derive(Subcommand)]
enum InstanceCommand {
    /// Create an instance from a template
    Create {
        /// Template slug, e.g. pulse-check
        #[arg(long)]
        template: String,

        #[arg(long)]
        name: String,

        /// Instance config as JSON, e.g. '{"audience_type":"all"}'
        #[arg(long)]
        config: String,

        /// Schedule cadence; defaults to scheduler.default_cadence
        #[arg(long)]
        cadence: Option<Cadence>,

        /// IANA timezone; defaults to scheduler.default_timezone
        #[arg(long)]
        timezone: Option<String>,

        /// Create without a schedule (manual runs only)
        #[arg(long, conflicts_with_all = ["cadence", "timezone"])]
        unscheduled: bool,
    },
    /// List instances with their stats
    List,
    /// Show one instance
    Show { instance_id: String },
    /// Change an instance's status (active, paused, draft)
    Status {
        instance_id: String,
        status: InstanceStatus,
    },
    /// Replace an instance's config
    Config { instance_id: String, config: String },
    /// Employees the instance would target right now
    Targets { instance_id: String },
}

#[derive(Subcommand)]
enum ConversationCommand {
    /// List conversations; employees see only their own
    List {
        #[arg(long)]
        instance: Option<String>,

        #[arg(long)]
        status: Option<ConversationStatus>,
    },
    /// Show a conversation with all its messages
    View { conversation_id: String },
    /// Close an active conversation (admin)
    Close { conversation_id: String },
    /// Mark agent messages read (participant)
    Read { conversation_id: String },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load().context("failed to load configuration")?;

    // Initialize logging
    let _log_guard =
        pulsewise_core::logging::init(&config.logging).context("failed to initialize logging")?;

    // Open database at XDG-compliant path
    let db_path = Config::database_path();
    tracing::info!(path = %db_path.display(), "Opening database");

    let db = Database::open_with(&db_path, &config.store).context("failed to open database")?;
    db.migrate().context("failed to run database migrations")?;

    let principal = cli.identity.principal();
    let out = output::Printer::new(cli.json);

    match cli.command {
        Command::Seed { demo } => {
            let installed = seed::install_templates(&db).context("failed to install templates")?;
            if demo {
                let company = seed::load_demo_company(&db, &principal.company_id)
                    .context("failed to load demo company")?;
                out.demo_company(installed, &company)?;
            } else {
                out.line(&format!("Installed {} template(s)", installed));
            }
        }

        Command::Templates => {
            let templates = db.list_templates()?;
            out.templates(&templates)?;
        }

        Command::Instance(command) => instance(&db, &config, &principal, &out, command)?,

        Command::Run { instance_id } => {
            let report = Orchestrator::new(&db, &config)
                .run_for(&principal, &instance_id)
                .with_context(|| format!("failed to run instance {}", instance_id))?;
            out.run(&report)?;
        }

        Command::Tick => {
            principal.require_admin("trigger the scheduler")?;
            let tick = Orchestrator::new(&db, &config).run_due(Utc::now())?;
            out.tick(&tick)?;
        }

        Command::Reply {
            conversation_id,
            message,
        } => {
            let outcome = Orchestrator::new(&db, &config)
                .handle_employee_reply(&principal, &conversation_id, &message)
                .with_context(|| format!("failed to reply to conversation {}", conversation_id))?;
            out.reply(&outcome)?;
        }

        Command::Conversation(command) => conversation(&db, &config, &principal, &out, command)?,

        Command::Escalations { open } => {
            principal.require_admin("view escalations")?;
            let status = open.then_some(EscalationStatus::Open);
            let escalations = db.list_escalations(&principal.company_id, status)?;
            out.escalations(&escalations)?;
        }

        Command::Analytics { instance } => {
            let snapshot = Analytics::new(&db, &config.analytics)
                .company_snapshot(&principal, instance.as_deref())
                .context("failed to compute analytics")?;
            out.snapshot(&snapshot)?;
        }
    }

    Ok(())
}

fn instance(
    db: &Database,
    config: &Config,
    principal: &Principal,
    out: &output::Printer,
    command: InstanceCommand,
) -> Result<()> {
    let registry = AgentRegistry::new(db);

    match command {
        InstanceCommand::Create {
            template,
            name,
            config: raw_config,
            cadence,
            timezone,
            unscheduled,
        } => {
            let template = db
                .get_template_by_slug(&template)?
                .with_context(|| format!("unknown template '{}', run `pulsewise seed` first", template))?;
            let instance_config: serde_json::Value =
                serde_json::from_str(&raw_config).context("--config is not valid JSON")?;

            let schedule = (!unscheduled).then(|| ScheduleSpec {
                cadence: cadence.unwrap_or(config.scheduler.default_cadence),
                timezone: timezone.unwrap_or_else(|| config.scheduler.default_timezone.clone()),
            });

            let instance = registry
                .create(
                    principal,
                    NewInstance {
                        template_id: template.id,
                        name,
                        config: instance_config,
                        schedule,
                    },
                    Utc::now(),
                )
                .context("failed to create instance")?;
            out.overview(&registry.get(principal, &instance.id)?)?;
        }

        InstanceCommand::List => {
            let overviews = registry.list(principal)?;
            out.overviews(&overviews)?;
        }

        InstanceCommand::Show { instance_id } => {
            out.overview(&registry.get(principal, &instance_id)?)?;
        }

        InstanceCommand::Status {
            instance_id,
            status,
        } => {
            registry.set_status(principal, &instance_id, status, Utc::now())?;
            out.overview(&registry.get(principal, &instance_id)?)?;
        }

        InstanceCommand::Config {
            instance_id,
            config: raw_config,
        } => {
            let value: serde_json::Value =
                serde_json::from_str(&raw_config).context("config is not valid JSON")?;
            registry.update_config(principal, &instance_id, &value, Utc::now())?;
            out.overview(&registry.get(principal, &instance_id)?)?;
        }

        InstanceCommand::Targets { instance_id } => {
            let targets = registry.targets(principal, &instance_id)?;
            out.targets(&targets)?;
        }
    }

    Ok(())
}

fn conversation(
    db: &Database,
    config: &Config,
    principal: &Principal,
    out: &output::Printer,
    command: ConversationCommand,
) -> Result<()> {
    let orchestrator = Orchestrator::new(db, config);

    match command {
        ConversationCommand::List { instance, status } => {
            // Employees only ever see their own conversations
            let participant = (!principal.is_admin).then(|| principal.user_id.clone());
            let conversations = db.list_conversations(
                &principal.company_id,
                &ConversationFilter {
                    agent_instance_id: instance,
                    participant_user_id: participant,
                    status,
                    limit: None,
                },
            )?;
            out.conversations(&conversations)?;
        }

        ConversationCommand::View { conversation_id } => {
            let page_size = config.store.message_page_size;
            let (conversation, mut page) =
                orchestrator.view(principal, &conversation_id, None, page_size)?;

            let mut messages = std::mem::take(&mut page.messages);
            while let Some(cursor) = page.next_cursor {
                (_, page) = orchestrator.view(principal, &conversation_id, Some(cursor), page_size)?;
                messages.append(&mut page.messages);
            }
            out.conversation(&conversation, &messages)?;
        }

        ConversationCommand::Close { conversation_id } => {
            let conversation = orchestrator.close(principal, &conversation_id, Utc::now())?;
            out.conversations(std::slice::from_ref(&conversation))?;
        }

        ConversationCommand::Read { conversation_id } => {
            let conversation = orchestrator.mark_read(principal, &conversation_id)?;
            out.conversations(std::slice::from_ref(&conversation))?;
        }
    }

    Ok(())
}
