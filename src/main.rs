//! charond 主入口

use charon::{
    auth::{permission::BUILTIN, MemorySessionStore, PasswordHasher, RemoteSessionStore, SessionStore},
    config::{AppConfig, SessionBackend, SessionConfig},
    db,
    handlers::health,
    middleware::AppState,
    repository::Repositories,
    routes,
    services::ServiceContext,
    telemetry,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 按优先级加载：.env.local > .env
    // 生产环境应该直接设置环境变量
    dotenv::from_filename(".env.local").ok();
    dotenv::dotenv().ok();

    health::set_start_time();

    // 1. 加载配置
    let config = AppConfig::from_env()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

    // 2. 初始化日志与指标
    telemetry::init_telemetry(&config.logging);
    telemetry::init_metrics();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "charond starting...");

    // 3. 数据库连接池 + 迁移
    let db_pool = db::create_pool(&config.database).await?;
    db::run_migrations(&db_pool).await?;

    tracing::info!("Database initialized");

    // 4. 会话存储与服务
    let sessions = session_store(&config.session)?;
    let hasher = Arc::new(PasswordHasher::new(
        config.security.password_cost,
        config.security.password_memory_kib,
    )?);
    let ctx = ServiceContext::new(
        Repositories::postgres(db_pool.clone()),
        sessions,
        hasher,
        config.security.clone(),
    );

    // 5. 注册内置权限
    let outcome = ctx.registry.register(&BUILTIN).await?;
    tracing::info!(
        created = outcome.created,
        untouched = outcome.untouched,
        removed = outcome.removed,
        "Built-in permissions registered"
    );

    let addr = config.server.addr.clone();
    let shutdown_timeout = config.server.graceful_shutdown_timeout_secs;
    let app_state = Arc::new(AppState::new(config, Some(db_pool), ctx));

    // 6. 构建路由并启动服务器
    let app = routes::create_router(app_state);
    let listener = TcpListener::bind(&addr).await?;

    tracing::info!(addr = %addr, "Server listening");

    // 7. 优雅关闭
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal(shutdown_timeout))
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

fn session_store(config: &SessionConfig) -> anyhow::Result<Arc<dyn SessionStore>> {
    match config.backend {
        SessionBackend::Memory => {
            tracing::info!(ttl_secs = config.ttl_secs, "Using in-memory session store");
            Ok(Arc::new(MemorySessionStore::new(Duration::from_secs(config.ttl_secs))))
        }
        SessionBackend::Remote => {
            let url = config
                .remote_url
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("session.remote_url is not set"))?;
            tracing::info!(url = %url, "Using remote session store");
            Ok(Arc::new(RemoteSessionStore::new(
                url,
                Duration::from_secs(config.request_timeout_secs),
            )?))
        }
    }
}

/// 优雅关闭信号处理
async fn shutdown_signal(timeout_secs: u64) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Ctrl+C received, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Terminate signal received, starting graceful shutdown");
        },
    }

    // 超时后强制退出
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(timeout_secs)).await;
        tracing::warn!("Graceful shutdown timeout reached, forcing exit");
        std::process::exit(1);
    });
}
