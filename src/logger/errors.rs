use crate::r#const::log_layout;
use chrono::Local;
use parking_lot::Mutex;
use std::{
    error::Error,
    fmt::Write as _,
    fs::{self, OpenOptions},
    io::{self, Write},
    panic::Location,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};
use tokio::runtime::Handle;
use tokio_util::task::TaskTracker;
use tracing::error;

/// 进程级错误通道
///
/// 每个被捕获的失败都追加一段记录到 `exceptions.log`；写入本身失败时直接丢弃，
/// 避免错误处理再引发新的错误。在运行时内，文件写入交给阻塞线程池。
#[derive(Debug)]
pub struct ErrorChannel {
    path: PathBuf,
    // 保证每段记录完整地追加
    lock: Arc<Mutex<()>>,
    reported: AtomicU64,
    // 尚未完成的写入
    pending: TaskTracker,
}

impl ErrorChannel {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            path: root.as_ref().join(log_layout::ERROR_LOG),
            lock: Arc::new(Mutex::new(())),
            reported: AtomicU64::new(0),
            pending: TaskTracker::new(),
        }
    }

    /// 记录一次失败，包括操作名称、时间、调用位置和完整的错误链
    #[track_caller]
    pub fn report(&self, operation: &str, err: &dyn Error) {
        let location = Location::caller();
        self.reported.fetch_add(1, Ordering::Relaxed);
        error!("{} failed: {}", operation, err);

        let mut block = String::new();
        let _ = writeln!(block, "{}", "=".repeat(60));
        let _ = writeln!(block, "WHAT : {} : {}", operation, err);
        let _ = writeln!(block, "WHEN : {}", Local::now().format("%Y-%m-%d %H:%M:%S%.3f"));
        let _ = writeln!(
            block,
            "WHERE : {}, {}:{}",
            operation,
            location.file(),
            location.line()
        );
        let _ = writeln!(block, "DETAILS : ");
        for line in format!("{:?}", err).lines() {
            let _ = writeln!(block, "    {}", line.trim());
        }
        let mut source = err.source();
        while let Some(cause) = source {
            let _ = writeln!(block, "    caused by: {}", cause);
            source = cause.source();
        }
        block.push_str("\n\n");

        let path = self.path.clone();
        let lock = self.lock.clone();
        let append = move || {
            let _guard = lock.lock();
            let _ = append_block(&path, &block);
        };
        // 运行时外（同步调用方）直接写入
        if Handle::try_current().is_ok() {
            self.pending.spawn_blocking(append);
        } else {
            append();
        }
    }

    /// 等待已提交的记录全部写入
    pub async fn flush(&self) {
        self.pending.close();
        self.pending.wait().await;
        self.pending.reopen();
    }

    /// 已记录的失败次数
    pub fn reported(&self) -> u64 {
        self.reported.load(Ordering::Relaxed)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn append_block(path: &Path, block: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(block.as_bytes())
}
