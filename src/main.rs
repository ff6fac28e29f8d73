use mimalloc::MiMalloc;
use ruleproxy::{
    admin::AdminServer,
    args::Args,
    config::Config,
    logger::LogRouter,
    supervisor::{ForwarderSupervisor, SupervisorSubsystem},
};
use std::{process, sync::Arc};
use tokio_graceful_shutdown::{IntoSubsystem, SubsystemBuilder, Toplevel};
use tracing::{error, info};

// 使用 mimalloc 分配器提高内存效率
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

fn init_logging(args: &Args) {
    let builder = tracing_subscriber::fmt()
        .with_ansi(false)
        .with_line_number(false);

    // 如果启用调试模式，输出调试信息，否则只输出 info 及以上级别
    if args.debug {
        builder.with_max_level(tracing::Level::DEBUG)
    } else {
        builder.with_max_level(tracing::Level::INFO)
    }
    .init();
}

// 程序入口
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 解析命令行参数
    let args = Args::parse_args();

    // 打印示例配置
    if args.sample {
        print!("{}", Config::sample_yaml()?);
        return Ok(());
    }

    // 初始化日志
    init_logging(&args);

    // 验证参数
    if let Err(e) = args.validation() {
        error!("Invalid command line arguments: {}", e);
        process::exit(1);
    }

    info!("Starting RuleProxy - rule-driven proxy selection and TCP/UDP forwarding");

    // 加载配置
    let config = match Config::from_file(&args.config) {
        Ok(config) => {
            info!("Successfully loaded configuration: {:?}", args.config);
            config
        }
        Err(e) => {
            error!("Failed to load configuration file: {}", e);
            process::exit(1);
        }
    };

    // 如果是测试模式，成功验证配置后退出
    if args.test_config {
        info!(
            "Configuration file validated successfully ({} forwarder(s))",
            config.forwarder_count()
        );
        return Ok(());
    }

    // 日志路由器
    let log = match LogRouter::new(&args.log_dir, &config.log_rules) {
        Ok(log) => Arc::new(log),
        Err(e) => {
            error!("Failed to initialize log router: {}", e);
            process::exit(1);
        }
    };
    log.set_dump_enabled(args.dump);
    info!(
        "Access log under {:?}, dump capture {}",
        args.log_dir,
        if args.dump { "enabled" } else { "disabled" }
    );

    // 管理服务与监管器
    let admin_config = config.admin.clone();
    let supervisor = ForwarderSupervisor::new(config, log)
        .with_config_path(&args.config)
        .into_shared();
    let admin_server = match AdminServer::new(admin_config, supervisor.clone()) {
        Ok(server) => server,
        Err(e) => {
            error!("Failed to create admin server: {}", e);
            process::exit(1);
        }
    };
    info!("Admin server initialized: {:?}", admin_server.addr());

    // 创建优雅关闭顶层管理器
    let toplevel = Toplevel::new(|s| async move {
        // 启动转发器子系统
        let forwarders = SupervisorSubsystem::new(supervisor);
        s.start(SubsystemBuilder::new("forwarders", move |s| async move {
            forwarders.run(s).await
        }));

        // 启动管理服务子系统
        s.start(SubsystemBuilder::new("admin_server", move |s| async move {
            admin_server.run(s).await
        }));
    });

    // 等待关闭
    match toplevel
        .catch_signals()
        .handle_shutdown_requests(tokio::time::Duration::from_secs(args.shutdown_timeout))
        .await
    {
        Ok(_) => {
            info!("Application gracefully shutdown");
            Ok(())
        }
        Err(e) => {
            error!("Application shutdown error: {}", e);
            process::exit(1);
        }
    }
}
