use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde::Serialize;

use crate::api::ApiClient;
use crate::auth::{EncryptedFileStorage, RehydrationPolicy, SessionHandle, SessionStore};
use crate::config::{ApiConfig, Settings};
use crate::models::{BookingStatus, NewBooking, NewReview, ProfileUpdate, RegisterRequest, Role};
use crate::services::{CaregiverFilter, DashboardSummary, Services};

#[derive(Parser)]
#[clap(name = "careconnect")]
#[clap(version = careconnect_core::meta::VERSION)]
#[clap(about = "CareConnect client: find caregivers, book sessions, stay in touch")]
struct Cli {
    /// Settings file to use instead of the one in the config directory
    #[clap(long, global = true)]
    settings: Option<PathBuf>,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Sign in with email and password
    Login {
        #[clap(long)]
        email: String,
        #[clap(long)]
        password: String,
    },
    /// Create an account and sign in
    Register {
        #[clap(long)]
        name: String,
        #[clap(long)]
        email: String,
        #[clap(long)]
        password: String,
        /// senior or caregiver
        #[clap(long, default_value = "senior")]
        role: Role,
        #[clap(long)]
        location: Option<String>,
    },
    Logout,
    /// Show the signed-in user
    Whoami,
    #[clap(subcommand)]
    Profile(ProfileCommand),
    /// Search caregivers
    Caregivers {
        #[clap(long)]
        location: Option<String>,
        /// Comma separated, e.g. morning,afternoon
        #[clap(long, value_delimiter = ',')]
        availability: Vec<String>,
        #[clap(long)]
        name: Option<String>,
        #[clap(long)]
        page: Option<u32>,
        #[clap(long)]
        limit: Option<u32>,
    },
    /// Show one caregiver
    Caregiver {
        id: String,
        /// Include the caregiver's reviews
        #[clap(long)]
        reviews: bool,
    },
    /// Review a caregiver after a session
    Review {
        caregiver: String,
        #[clap(long)]
        session: String,
        #[clap(long)]
        rating: u8,
        #[clap(long, default_value = "")]
        comment: String,
    },
    /// List your sessions
    Sessions {
        #[clap(long)]
        status: Option<BookingStatus>,
        #[clap(long, default_value_t = 1)]
        page: u32,
        #[clap(long, default_value_t = 10)]
        limit: u32,
    },
    #[clap(subcommand)]
    Session(SessionCommand),
    /// Request a session with a caregiver
    Book {
        #[clap(long)]
        caregiver: String,
        /// YYYY-MM-DD
        #[clap(long)]
        date: String,
        #[clap(long)]
        time: String,
        /// Hours
        #[clap(long, default_value_t = 1.0)]
        duration: f64,
        #[clap(long)]
        purpose: String,
        #[clap(long)]
        notes: Option<String>,
    },
    Notifications {
        #[clap(long, default_value_t = 1)]
        page: u32,
        #[clap(long, default_value_t = crate::services::notifications::DEFAULT_LIMIT)]
        limit: u32,
        /// Mark one notification as read
        #[clap(long, conflicts_with = "read_all")]
        read: Option<String>,
        /// Mark every notification as read
        #[clap(long)]
        read_all: bool,
    },
    /// Conversations, or the thread with one participant
    Messages { with: Option<String> },
    Send { receiver: String, content: String },
    Dashboard,
    /// Delete your account and sign out
    DeleteAccount {
        #[clap(long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum ProfileCommand {
    Show,
    Update {
        #[clap(long)]
        name: Option<String>,
        #[clap(long)]
        location: Option<String>,
        #[clap(long)]
        phone: Option<String>,
        #[clap(long)]
        bio: Option<String>,
    },
    /// Upload a profile picture
    Picture { path: PathBuf },
}

#[derive(Subcommand)]
enum SessionCommand {
    Show { id: String },
    Accept { id: String },
    Decline {
        id: String,
        #[clap(long)]
        reason: Option<String>,
    },
    Cancel {
        id: String,
        #[clap(long)]
        reason: Option<String>,
    },
    Complete {
        id: String,
        #[clap(long)]
        notes: Option<String>,
    },
    Reschedule {
        id: String,
        #[clap(long)]
        date: String,
        #[clap(long)]
        time: String,
    },
}

pub fn launch() -> Result<()> {
    let cli = Cli::parse();
    let settings = match &cli.settings {
        Some(path) => Settings::load_from(Some(path.clone()))?,
        None => Settings::load()?,
    };
    let _guard = crate::log::init_logging(&settings)?;
    tracing::debug!("Starting {}", careconnect_core::meta::user_agent());

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start runtime")?;
    runtime.block_on(run(cli.command, settings))
}

async fn run(command: Command, settings: Settings) -> Result<()> {
    let storage = Arc::new(EncryptedFileStorage::new(settings.data_dir.clone())?);
    let client = ApiClient::new(ApiConfig::default(), storage)?;
    let handle = SessionHandle::new();
    let store = SessionStore::new(client.clone(), handle.clone());

    let policy = if settings.revalidate_on_startup {
        RehydrationPolicy::Revalidate
    } else {
        RehydrationPolicy::TrustCache
    };
    store.initialize(policy).await;

    let services = Services::new(&client, &handle, settings.data_source);

    match command {
        Command::Login { email, password } => print(&store.login(&email, &password).await?),
        Command::Register {
            name,
            email,
            password,
            role,
            location,
        } => {
            let mut request = RegisterRequest::new(name, email, password, role);
            request.location = location;
            let user = match role {
                Role::Senior => store.register(&request).await?,
                Role::Caregiver => store.register_caregiver(&request).await?,
            };
            print(&user)
        }
        Command::Logout => {
            store.logout().await?;
            println!("Signed out");
            Ok(())
        }
        Command::Whoami => match handle.identity() {
            Some(user) => print(&user),
            None => bail!("not signed in"),
        },
        Command::Profile(ProfileCommand::Show) => print(&services.profile.get_profile().await?),
        Command::Profile(ProfileCommand::Update {
            name,
            location,
            phone,
            bio,
        }) => {
            let update = ProfileUpdate {
                name,
                location,
                phone,
                bio,
                ..ProfileUpdate::default()
            };
            if update.is_empty() {
                bail!("nothing to update");
            }
            print(&store.update_profile(&update).await?)
        }
        Command::Profile(ProfileCommand::Picture { path }) => {
            let upload = services.profile.upload_picture(&path).await?;
            if let Some(user) = upload.user.clone() {
                store.update_user(user)?;
            }
            print(&upload)
        }
        Command::Caregivers {
            location,
            availability,
            name,
            page,
            limit,
        } => {
            let filter = CaregiverFilter {
                location,
                availability,
                name,
                page,
                limit,
            };
            print(&services.caregivers.search(&filter).await?)
        }
        Command::Caregiver { id, reviews } => {
            let caregiver = services.caregivers.get(&id).await?;
            if reviews {
                let reviews = services.caregivers.reviews(&id, 1, 10).await?;
                print(&serde_json::json!({ "caregiver": caregiver, "reviews": reviews }))
            } else {
                print(&caregiver)
            }
        }
        Command::Review {
            caregiver,
            session,
            rating,
            comment,
        } => {
            if !(1..=5).contains(&rating) {
                bail!("rating must be between 1 and 5");
            }
            let review = NewReview {
                rating,
                comment,
                session_id: session,
            };
            print(&services.caregivers.add_review(&caregiver, &review).await?)
        }
        Command::Sessions {
            status,
            page,
            limit,
        } => print(&services.bookings.list(status, page, limit).await?),
        Command::Session(action) => {
            let bookings = &services.bookings;
            match action {
                SessionCommand::Show { id } => print(&bookings.get(&id).await?),
                SessionCommand::Accept { id } => print(&bookings.accept(&id).await?),
                SessionCommand::Decline { id, reason } => {
                    print(&bookings.decline(&id, reason.as_deref()).await?)
                }
                SessionCommand::Cancel { id, reason } => {
                    print(&bookings.cancel(&id, reason.as_deref()).await?)
                }
                SessionCommand::Complete { id, notes } => {
                    print(&bookings.complete(&id, notes.as_deref()).await?)
                }
                SessionCommand::Reschedule { id, date, time } => {
                    print(&bookings.reschedule(&id, &date, &time).await?)
                }
            }
        }
        Command::Book {
            caregiver,
            date,
            time,
            duration,
            purpose,
            notes,
        } => {
            let booking = NewBooking {
                caregiver_id: caregiver,
                date,
                time,
                duration,
                purpose,
                notes,
            };
            print(&services.bookings.request(&booking).await?)
        }
        Command::Notifications {
            page,
            limit,
            read,
            read_all,
        } => {
            let notifications = &services.notifications;
            if let Some(id) = read {
                print(&notifications.mark_read(&id).await?)
            } else if read_all {
                print(&notifications.mark_all_read().await?)
            } else {
                print(&notifications.list(page, limit).await?)
            }
        }
        Command::Messages { with: Some(participant) } => {
            print(&services.messages.thread(&participant).await?)
        }
        Command::Messages { with: None } => print(&services.messages.conversations().await?),
        Command::Send { receiver, content } => {
            print(&services.messages.send(&receiver, &content).await?)
        }
        Command::Dashboard => {
            let summary =
                DashboardSummary::load(&services.bookings, &services.notifications).await?;
            print(&summary)
        }
        Command::DeleteAccount { yes } => {
            if !yes {
                bail!("pass --yes to delete your account");
            }
            store.delete_account().await?;
            println!("Account deleted");
            Ok(())
        }
    }
}

fn print<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
