//! hallpassd - The hall pass background service
//!
//! This is the main entry point for the hallpassd service.
//! It wires together all the components:
//! - Configuration loading and destination seeding
//! - Store initialization
//! - Checkout engine
//! - IPC server
//! - Periodic auto-return sweep

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use clap::Parser;
use hallpass_api::{
    Command, Destination, ErrorCode, ErrorInfo, Event, EventPayload, Response, ResponsePayload,
};
use hallpass_config::{Config, load_config};
use hallpass_core::{CheckoutEngine, CheckoutError, CheckoutReceipt};
use hallpass_ipc::{IpcServer, ServerMessage};
use hallpass_store::{SqliteStore, Store};
use hallpass_util::{ClientId, RateLimiter, default_config_path, is_plausible_email};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::Mutex;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

/// hallpassd - Checkout reservation service for classrooms
#[derive(Parser, Debug)]
#[command(name = "hallpassd")]
#[command(about = "Checkout reservation and auto-return service for classrooms", long_about = None)]
struct Args {
    /// Configuration file path (default: ~/.config/hallpassd/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Socket path override (or set HALLPASS_SOCKET env var)
    #[arg(short, long, env = "HALLPASS_SOCKET")]
    socket: Option<PathBuf>,

    /// Data directory override (or set HALLPASS_DATA_DIR env var)
    #[arg(short, long, env = "HALLPASS_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

/// Main service state
struct Service {
    engine: Arc<CheckoutEngine>,
    ipc: Arc<IpcServer>,
    rate_limiter: RateLimiter,
    sweep_interval: Duration,
}

impl Service {
    async fn new(args: &Args) -> Result<Self> {
        // Load configuration. The config file is optional unless the
        // caller named one explicitly: the service runs fine on defaults,
        // with destinations managed over IPC.
        let config_path = args.config.clone().unwrap_or_else(default_config_path);
        let config = if config_path.exists() {
            let config = load_config(&config_path)
                .with_context(|| format!("Failed to load config from {:?}", config_path))?;
            info!(
                config_path = %config_path.display(),
                destination_count = config.destinations.len(),
                "Configuration loaded"
            );
            config
        } else if args.config.is_some() {
            anyhow::bail!("Config file not found: {}", config_path.display());
        } else {
            info!(config_path = %config_path.display(), "No config file, using defaults");
            Config::default()
        };

        // Determine paths
        let socket_path = args
            .socket
            .clone()
            .unwrap_or_else(|| config.service.socket_path.clone());

        let data_dir = args
            .data_dir
            .clone()
            .unwrap_or_else(|| config.service.data_dir.clone());

        // Create data directory
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory {:?}", data_dir))?;

        // Initialize store
        let db_path = data_dir.join("hallpassd.db");
        let store: Arc<dyn Store> = Arc::new(
            SqliteStore::open(&db_path)
                .with_context(|| format!("Failed to open database {:?}", db_path))?,
        );

        info!(db_path = %db_path.display(), "Store initialized");

        // Initialize the engine and seed the destination catalog
        let engine = Arc::new(CheckoutEngine::new(store));
        for destination in &config.destinations {
            engine.upsert_destination(destination).with_context(|| {
                format!("Failed to seed destination '{}'", destination.id)
            })?;
        }
        if !config.destinations.is_empty() {
            info!(
                count = config.destinations.len(),
                "Destination catalog seeded"
            );
        }

        // Initialize IPC server
        let mut ipc = IpcServer::new(&socket_path);
        ipc.start().await.context("Failed to start IPC server")?;

        info!(socket_path = %socket_path.display(), "IPC server started");

        // Rate limiter: 30 requests per second per client
        let rate_limiter = RateLimiter::new(30, Duration::from_secs(1));

        Ok(Self {
            engine,
            ipc: Arc::new(ipc),
            rate_limiter,
            sweep_interval: config.service.sweep_interval,
        })
    }

    async fn run(self) -> Result<()> {
        let ipc_ref = self.ipc.clone();
        let mut ipc_messages = ipc_ref
            .take_message_receiver()
            .await
            .expect("Message receiver should be available");

        let engine = self.engine.clone();
        let rate_limiter = Arc::new(Mutex::new(self.rate_limiter));

        // Spawn IPC accept task
        let ipc_accept = ipc_ref.clone();
        tokio::spawn(async move {
            if let Err(e) = ipc_accept.run().await {
                error!(error = %e, "IPC server error");
            }
        });

        // Set up signal handlers
        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to create SIGTERM handler")?;
        let mut sigint =
            signal(SignalKind::interrupt()).context("Failed to create SIGINT handler")?;
        let mut sighup = signal(SignalKind::hangup()).context("Failed to create SIGHUP handler")?;

        // Main event loop. The sweep timer's first tick fires immediately,
        // so checkouts left overdue across a restart are closed at boot.
        let mut sweep_timer = tokio::time::interval(self.sweep_interval);

        info!("Service running");

        loop {
            tokio::select! {
                // Signals - graceful shutdown
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, shutting down gracefully");
                    break;
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, shutting down gracefully");
                    break;
                }
                _ = sighup.recv() => {
                    info!("Received SIGHUP, shutting down gracefully");
                    break;
                }

                // Sweep timer - close checkouts past their deadline
                _ = sweep_timer.tick() => {
                    let now = hallpass_util::now();
                    match engine.sweep(now) {
                        Ok(0) => {}
                        Ok(closed) => {
                            ipc_ref.broadcast_event(Event::new(EventPayload::SweepCompleted {
                                closed,
                            }));
                            Self::broadcast_state(&engine, &ipc_ref, now);
                        }
                        Err(e) => {
                            error!(error = %e, "Scheduled sweep failed, retrying next tick");
                        }
                    }

                    rate_limiter.lock().await.cleanup(Duration::from_secs(300));
                }

                // IPC messages
                Some(msg) = ipc_messages.recv() => {
                    Self::handle_ipc_message(&engine, &ipc_ref, &rate_limiter, msg).await;
                }
            }
        }

        // Graceful shutdown
        info!("Shutting down hallpassd");

        ipc_ref.broadcast_event(Event::new(EventPayload::Shutdown));
        // Give connection writers a moment to flush the shutdown notice
        tokio::time::sleep(Duration::from_millis(50)).await;
        ipc_ref.shutdown();

        info!("Shutdown complete");
        Ok(())
    }

    async fn handle_ipc_message(
        engine: &Arc<CheckoutEngine>,
        ipc: &Arc<IpcServer>,
        rate_limiter: &Arc<Mutex<RateLimiter>>,
        msg: ServerMessage,
    ) {
        match msg {
            ServerMessage::Request { client_id, request } => {
                // Rate limiting
                {
                    let mut limiter = rate_limiter.lock().await;
                    if !limiter.allow(&client_id) {
                        let response = Response::error(
                            request.request_id,
                            ErrorInfo::new(ErrorCode::RateLimited, "Too many requests"),
                        );
                        let _ = ipc.send_response(&client_id, response).await;
                        return;
                    }
                }

                let response =
                    Self::handle_command(engine, ipc, &client_id, request.request_id, request.command)
                        .await;

                let _ = ipc.send_response(&client_id, response).await;
            }

            ServerMessage::ClientConnected { client_id, info } => {
                info!(
                    client_id = %client_id,
                    role = ?info.role,
                    uid = ?info.uid,
                    "Client connected"
                );
            }

            ServerMessage::ClientDisconnected { client_id } => {
                debug!(client_id = %client_id, "Client disconnected");

                // Clean up rate limiter
                let mut limiter = rate_limiter.lock().await;
                limiter.remove_client(&client_id);
            }
        }
    }

    async fn handle_command(
        engine: &Arc<CheckoutEngine>,
        ipc: &Arc<IpcServer>,
        client_id: &ClientId,
        request_id: u64,
        command: Command,
    ) -> Response {
        let now = hallpass_util::now();

        match command {
            Command::GetState => match engine.board_snapshot(now) {
                Ok(state) => Response::success(request_id, ResponsePayload::State(state)),
                Err(e) => Self::error_response(request_id, e),
            },

            Command::CheckOut {
                email,
                destination_id,
                note,
            } => {
                if let Some(info) = ipc.get_client_info(client_id).await
                    && !info.role.can_check_out()
                {
                    return Self::permission_denied(request_id);
                }

                match engine.check_out(&email, &destination_id, note, now) {
                    Ok(receipt) => {
                        Self::broadcast_checkout(engine, ipc, &receipt, now);
                        Response::success(
                            request_id,
                            ResponsePayload::CheckedOut {
                                reservation_id: receipt.reservation_id,
                                destination_name: receipt.destination_name,
                                deadline: receipt.deadline,
                                message: receipt.message,
                            },
                        )
                    }
                    Err(e) => Self::error_response(request_id, e),
                }
            }

            Command::CheckIn { email } => {
                if let Some(info) = ipc.get_client_info(client_id).await
                    && !info.role.can_check_out()
                {
                    return Self::permission_denied(request_id);
                }

                match engine.check_in(&email, now) {
                    Ok(receipt) => {
                        if let Some(record) = &receipt.record {
                            ipc.broadcast_event(Event::new(EventPayload::ReservationClosed {
                                record: record.clone(),
                            }));
                        }
                        Self::broadcast_state(engine, ipc, now);
                        Response::success(
                            request_id,
                            ResponsePayload::CheckedIn {
                                duration_minutes: receipt.duration_minutes,
                                message: receipt.message,
                            },
                        )
                    }
                    Err(e) => Self::error_response(request_id, e),
                }
            }

            Command::ResetAll => {
                if let Some(info) = ipc.get_client_info(client_id).await
                    && !info.role.can_reset()
                {
                    return Self::permission_denied(request_id);
                }

                match engine.reset_all(now) {
                    Ok(count) => {
                        Self::broadcast_state(engine, ipc, now);
                        Response::success(request_id, ResponsePayload::ResetComplete { count })
                    }
                    Err(e) => Self::error_response(request_id, e),
                }
            }

            Command::Availability { class } => match engine.availability(&class) {
                Ok(availability) => {
                    Response::success(request_id, ResponsePayload::Availability(availability))
                }
                Err(e) => Self::error_response(request_id, e),
            },

            Command::ListActive => match engine.active_board(now) {
                Ok(active) => Response::success(request_id, ResponsePayload::Active(active)),
                Err(e) => Self::error_response(request_id, e),
            },

            Command::Sweep => {
                if let Some(info) = ipc.get_client_info(client_id).await
                    && !info.role.can_sweep()
                {
                    return Self::permission_denied(request_id);
                }

                match engine.sweep(now) {
                    Ok(closed) => {
                        if closed > 0 {
                            ipc.broadcast_event(Event::new(EventPayload::SweepCompleted {
                                closed,
                            }));
                            Self::broadcast_state(engine, ipc, now);
                        }
                        Response::success(request_id, ResponsePayload::SweepComplete { closed })
                    }
                    Err(e) => Self::error_response(request_id, e),
                }
            }

            Command::GetSettings => match engine.auto_return_minutes() {
                Ok(minutes) => Response::success(
                    request_id,
                    ResponsePayload::Settings {
                        auto_return_minutes: minutes,
                    },
                ),
                Err(e) => Self::error_response(request_id, e),
            },

            Command::SetSettings {
                auto_return_minutes,
            } => {
                if let Some(info) = ipc.get_client_info(client_id).await
                    && !info.role.can_edit_settings()
                {
                    return Self::permission_denied(request_id);
                }

                match engine.set_auto_return_minutes(auto_return_minutes) {
                    Ok(minutes) => {
                        ipc.broadcast_event(Event::new(EventPayload::SettingsChanged {
                            auto_return_minutes: minutes,
                        }));
                        Self::broadcast_state(engine, ipc, now);
                        Response::success(
                            request_id,
                            ResponsePayload::Settings {
                                auto_return_minutes: minutes,
                            },
                        )
                    }
                    Err(e) => Self::error_response(request_id, e),
                }
            }

            Command::UpsertStudent {
                name,
                email,
                gender,
                class,
            } => {
                if let Some(info) = ipc.get_client_info(client_id).await
                    && !info.role.can_manage_roster()
                {
                    return Self::permission_denied(request_id);
                }

                if name.trim().is_empty() {
                    return Response::error(
                        request_id,
                        ErrorInfo::new(ErrorCode::InvalidRequest, "Student name must not be empty"),
                    );
                }
                if !is_plausible_email(email.trim()) {
                    return Response::error(
                        request_id,
                        ErrorInfo::new(ErrorCode::InvalidRequest, "A valid email address is required"),
                    );
                }

                match engine.upsert_student(&name, &email, &gender, class.as_deref()) {
                    Ok(student) => {
                        Self::broadcast_roster(engine, ipc);
                        Response::success(
                            request_id,
                            ResponsePayload::StudentUpserted { id: student.id },
                        )
                    }
                    Err(e) => Self::error_response(request_id, e),
                }
            }

            Command::RemoveStudent { email } => {
                if let Some(info) = ipc.get_client_info(client_id).await
                    && !info.role.can_manage_roster()
                {
                    return Self::permission_denied(request_id);
                }

                match engine.remove_student(&email) {
                    Ok(()) => {
                        Self::broadcast_roster(engine, ipc);
                        Response::success(request_id, ResponsePayload::StudentRemoved)
                    }
                    Err(e) => Self::error_response(request_id, e),
                }
            }

            Command::ListStudents => match engine.list_students() {
                Ok(students) => Response::success(request_id, ResponsePayload::Students(students)),
                Err(e) => Self::error_response(request_id, e),
            },

            Command::NormalizeGenders => {
                if let Some(info) = ipc.get_client_info(client_id).await
                    && !info.role.can_manage_roster()
                {
                    return Self::permission_denied(request_id);
                }

                match engine.normalize_genders() {
                    Ok(updated) => {
                        Self::broadcast_roster(engine, ipc);
                        Response::success(
                            request_id,
                            ResponsePayload::GendersNormalized { updated },
                        )
                    }
                    Err(e) => Self::error_response(request_id, e),
                }
            }

            Command::UpsertDestination {
                id,
                name,
                active,
                sort_order,
            } => {
                if let Some(info) = ipc.get_client_info(client_id).await
                    && !info.role.can_manage_roster()
                {
                    return Self::permission_denied(request_id);
                }

                if id.as_str().trim().is_empty() || name.trim().is_empty() {
                    return Response::error(
                        request_id,
                        ErrorInfo::new(
                            ErrorCode::InvalidRequest,
                            "Destination id and name must not be empty",
                        ),
                    );
                }

                let destination = Destination {
                    id,
                    name,
                    active,
                    sort_order,
                };
                match engine.upsert_destination(&destination) {
                    Ok(()) => Response::success(request_id, ResponsePayload::DestinationUpserted),
                    Err(e) => Self::error_response(request_id, e),
                }
            }

            Command::ListDestinations => match engine.list_destinations() {
                Ok(destinations) => {
                    Response::success(request_id, ResponsePayload::Destinations(destinations))
                }
                Err(e) => Self::error_response(request_id, e),
            },

            Command::ListAudit { limit } => {
                // Newest first; the limit is capped to keep responses bounded
                let limit = limit.unwrap_or(100).min(1000) as usize;
                match engine.recent_audit(limit) {
                    Ok(records) => {
                        Response::success(request_id, ResponsePayload::AuditRecords(records))
                    }
                    Err(e) => Self::error_response(request_id, e),
                }
            }

            Command::DeleteAuditRecord { id } => {
                if let Some(info) = ipc.get_client_info(client_id).await
                    && !info.role.can_delete_audit()
                {
                    return Self::permission_denied(request_id);
                }

                match engine.delete_audit_record(id) {
                    Ok(removed) => {
                        Response::success(request_id, ResponsePayload::AuditDeleted { removed })
                    }
                    Err(e) => Self::error_response(request_id, e),
                }
            }

            Command::DeleteAuditRecords { ids } => {
                if let Some(info) = ipc.get_client_info(client_id).await
                    && !info.role.can_delete_audit()
                {
                    return Self::permission_denied(request_id);
                }

                match engine.delete_audit_records(&ids) {
                    Ok(removed) => {
                        Response::success(request_id, ResponsePayload::AuditDeleted { removed })
                    }
                    Err(e) => Self::error_response(request_id, e),
                }
            }

            Command::DeleteAuditByClass { class } => {
                if let Some(info) = ipc.get_client_info(client_id).await
                    && !info.role.can_delete_audit()
                {
                    return Self::permission_denied(request_id);
                }

                match engine.delete_audit_by_class(&class) {
                    Ok(removed) => {
                        Response::success(request_id, ResponsePayload::AuditDeleted { removed })
                    }
                    Err(e) => Self::error_response(request_id, e),
                }
            }

            Command::DeleteAllAudit => {
                if let Some(info) = ipc.get_client_info(client_id).await
                    && !info.role.can_delete_audit()
                {
                    return Self::permission_denied(request_id);
                }

                match engine.delete_all_audit() {
                    Ok(removed) => {
                        Response::success(request_id, ResponsePayload::AuditDeleted { removed })
                    }
                    Err(e) => Self::error_response(request_id, e),
                }
            }

            Command::SubscribeEvents => Response::success(
                request_id,
                ResponsePayload::Subscribed {
                    client_id: client_id.clone(),
                },
            ),

            Command::UnsubscribeEvents => {
                Response::success(request_id, ResponsePayload::Unsubscribed)
            }

            Command::GetHealth => {
                Response::success(request_id, ResponsePayload::Health(engine.health()))
            }

            Command::Ping => Response::success(request_id, ResponsePayload::Pong),
        }
    }

    /// Map a domain failure onto the protocol. Store failures log the
    /// full cause here; the client sees only the generic retry message.
    fn error_response(request_id: u64, err: CheckoutError) -> Response {
        if let CheckoutError::Store(cause) = &err {
            error!(error = %cause, "Store failure while handling a request");
        }

        let code = match &err {
            CheckoutError::NotFound => ErrorCode::NotFound,
            CheckoutError::AlreadyOut { .. } => ErrorCode::AlreadyOut,
            CheckoutError::NoGenderOnFile { .. } => ErrorCode::NoGenderOnFile,
            CheckoutError::CapacityExceeded { .. } => ErrorCode::CapacityExceeded,
            CheckoutError::InvalidDestination { .. } => ErrorCode::InvalidDestination,
            CheckoutError::NotCheckedOut { .. } => ErrorCode::NotCheckedOut,
            CheckoutError::OutOfRange { .. } => ErrorCode::OutOfRange,
            CheckoutError::Store(_) => ErrorCode::StoreUnavailable,
        };

        Response::error(request_id, ErrorInfo::new(code, err.to_string()))
    }

    fn permission_denied(request_id: u64) -> Response {
        Response::error(
            request_id,
            ErrorInfo::new(ErrorCode::PermissionDenied, "Teacher role required"),
        )
    }

    /// Broadcast the refreshed board to subscribed clients.
    fn broadcast_state(engine: &Arc<CheckoutEngine>, ipc: &Arc<IpcServer>, now: DateTime<Local>) {
        match engine.board_snapshot(now) {
            Ok(snapshot) => {
                ipc.broadcast_event(Event::new(EventPayload::StateChanged(snapshot)));
            }
            Err(e) => {
                error!(error = %e, "Failed to build board snapshot for broadcast");
            }
        }
    }

    /// After an admission: the opened reservation, then the refreshed board.
    fn broadcast_checkout(
        engine: &Arc<CheckoutEngine>,
        ipc: &Arc<IpcServer>,
        receipt: &CheckoutReceipt,
        now: DateTime<Local>,
    ) {
        match engine.board_snapshot(now) {
            Ok(snapshot) => {
                match snapshot
                    .active
                    .iter()
                    .find(|v| v.reservation_id == receipt.reservation_id)
                {
                    Some(view) => {
                        ipc.broadcast_event(Event::new(EventPayload::ReservationOpened {
                            reservation: view.clone(),
                        }));
                    }
                    // A concurrent termination can beat this read; the
                    // closing side already announced it
                    None => {
                        debug!(reservation_id = %receipt.reservation_id, "Reservation closed before broadcast");
                    }
                }
                ipc.broadcast_event(Event::new(EventPayload::StateChanged(snapshot)));
            }
            Err(e) => {
                error!(error = %e, "Failed to build board snapshot for broadcast");
            }
        }
    }

    fn broadcast_roster(engine: &Arc<CheckoutEngine>, ipc: &Arc<IpcServer>) {
        match engine.list_students() {
            Ok(students) => {
                ipc.broadcast_event(Event::new(EventPayload::RosterChanged {
                    student_count: students.len(),
                }));
            }
            Err(e) => {
                error!(error = %e, "Failed to count roster for broadcast");
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "hallpassd starting");

    // Create and run the service
    let service = Service::new(&args).await?;
    service.run().await
}
