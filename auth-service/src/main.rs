use auth_service::{
    build_router,
    config::AuthConfig,
    db,
    grpc::{
        proto::{
            auth_service_server::AuthServiceServer, authz_service_server::AuthzServiceServer,
            otp_service_server::OtpServiceServer, role_service_server::RoleServiceServer,
        },
        AuthServiceImpl, AuthzServiceImpl, OtpServiceImpl, RoleServiceImpl,
    },
    middleware::IdentityState,
    services::{
        bootstrap_admin, Authorizer, Database, EmailProvider, EmailService, JwtService, KeyValueStore,
        LocalPermissionClient, OtpService, PgUserDirectory, RedisService, UserDirectory,
    },
    AppState,
};
use service_core::error::AppError;
use service_core::grpc::{identity_logging_interceptor, GrpcServerBuilder, PermissionChecker};
use service_core::observability::logging::init_tracing;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Load configuration - fail fast if invalid
    let config = AuthConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    );

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        security_enabled = config.security.enabled,
        security_mode = ?config.security.mode,
        "Starting identity and access service"
    );

    // PostgreSQL: RBAC graph and user directory
    let pool = db::create_pool(&config.database).await?;
    db::run_migrations(&pool).await?;
    let database = Database::new(pool.clone());
    let users: Arc<dyn UserDirectory> = Arc::new(PgUserDirectory::new(pool));
    bootstrap_admin(&database, users.as_ref(), &config.bootstrap).await?;
    tracing::info!("Database initialized successfully");

    let redis: Arc<dyn KeyValueStore> = Arc::new(RedisService::new(&config.redis).await?);
    tracing::info!("Redis service initialized");

    let email: Arc<dyn EmailProvider> = Arc::new(EmailService::new(&config.smtp)?);
    tracing::info!("Email service initialized");

    let jwt = JwtService::from_config(config.environment, &config.jwt);

    let authorizer = Authorizer::new(Arc::new(database.clone()));
    let permissions = match config.authz_endpoint.as_deref() {
        Some(endpoint) => PermissionChecker::from_endpoint(Some(endpoint))
            .await
            .map_err(|e| {
                AppError::ConfigError(anyhow::anyhow!("AUTHZ_ENDPOINT {}: {}", endpoint, e))
            })?,
        None => PermissionChecker::new(Arc::new(LocalPermissionClient::new(authorizer.clone()))),
    };
    let otp = Arc::new(OtpService::new(
        redis.clone(),
        email,
        users.clone(),
        config.otp.clone(),
    ));

    let state = AppState {
        config: config.clone(),
        db: database.clone(),
        redis,
        users: users.clone(),
        jwt: jwt.clone(),
        identity: IdentityState::new(jwt.clone(), config.security.clone()),
    };
    let app = build_router(state);

    // gRPC health service
    let (mut health_reporter, grpc_health_service) = tonic_health::server::health_reporter();
    health_reporter
        .set_serving::<AuthzServiceServer<AuthzServiceImpl>>()
        .await;
    health_reporter
        .set_serving::<OtpServiceServer<OtpServiceImpl>>()
        .await;

    let grpc_addr = SocketAddr::from(([0, 0, 0, 0], config.common.grpc_port));
    let grpc_server = GrpcServerBuilder::new(config.service_name.clone())
        .with_request_timeout(Duration::from_secs(30))
        .build_server()
        .add_service(grpc_health_service)
        .add_service(AuthServiceServer::with_interceptor(
            AuthServiceImpl::new(jwt, users),
            identity_logging_interceptor,
        ))
        .add_service(AuthzServiceServer::with_interceptor(
            AuthzServiceImpl::new(authorizer.clone()),
            identity_logging_interceptor,
        ))
        .add_service(OtpServiceServer::with_interceptor(
            OtpServiceImpl::new(otp, permissions),
            identity_logging_interceptor,
        ))
        .add_service(RoleServiceServer::with_interceptor(
            RoleServiceImpl::new(database, authorizer),
            identity_logging_interceptor,
        ))
        .serve_with_shutdown(grpc_addr, shutdown_signal());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!(http = %addr, grpc = %grpc_addr, "Listening");

    let http_server = service_core::axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal());

    // Either server stopping ends the process
    tokio::select! {
        result = http_server => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server error");
                return Err(e.into());
            }
        }
        result = grpc_server => {
            if let Err(e) = result {
                tracing::error!(error = %e, "gRPC server error");
                return Err(AppError::InternalError(anyhow::anyhow!(e)));
            }
        }
    }

    tracing::info!("Service shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
