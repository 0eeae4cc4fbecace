//! Bounded pool of render engines.
//!
//! At most `size` renders run at once; waiters are admitted in arrival order
//! (tokio's semaphore is fair). Each render holds an exclusive lease on one
//! engine. The lease returns the engine to the idle list only after a clean
//! render; on error, timeout, or cancellation the engine is torn down and a
//! fresh one is created for the next lease.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("render timed out after {0:?}")]
    Timeout(Duration),

    #[error("render engine failed: {0}")]
    Engine(String),

    #[error("render pool is shut down")]
    Closed,
}

/// Turns an HTML document into PDF bytes.
#[async_trait]
pub trait RenderEngine: Send {
    async fn render(&mut self, html: &str) -> Result<Vec<u8>, String>;
}

#[async_trait]
pub trait EngineFactory: Send + Sync {
    /// `slot` is a process-unique number for the new engine.
    async fn create(&self, slot: usize) -> Result<Box<dyn RenderEngine>, String>;
}

pub struct RenderPool {
    size: usize,
    permits: Semaphore,
    idle: Mutex<Vec<Box<dyn RenderEngine>>>,
    factory: Arc<dyn EngineFactory>,
    timeout: Duration,
    created: AtomicUsize,
}

impl RenderPool {
    pub fn new(size: usize, timeout: Duration, factory: Arc<dyn EngineFactory>) -> Self {
        Self {
            size,
            permits: Semaphore::new(size),
            idle: Mutex::new(Vec::with_capacity(size)),
            factory,
            timeout,
            created: AtomicUsize::new(0),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Renders currently admitted.
    pub fn in_use(&self) -> usize {
        self.size - self.permits.available_permits()
    }

    /// Engines created over the pool's lifetime.
    pub fn engines_created(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }

    pub async fn render(&self, html: &str) -> Result<Vec<u8>, RenderError> {
        // declared before the lease so the lease is dropped first
        let _permit = self.permits.acquire().await.map_err(|_| RenderError::Closed)?;
        let mut lease = self.lease().await?;
        let Some(engine) = lease.engine.as_mut() else {
            return Err(RenderError::Closed);
        };

        match tokio::time::timeout(self.timeout, engine.render(html)).await {
            Ok(Ok(pdf)) => {
                lease.mark_healthy();
                Ok(pdf)
            }
            Ok(Err(e)) => {
                log::warn!("[RENDER] Engine failed, discarding it: {}", e);
                Err(RenderError::Engine(e))
            }
            Err(_) => {
                log::warn!("[RENDER] Render exceeded {:?}, discarding engine", self.timeout);
                Err(RenderError::Timeout(self.timeout))
            }
        }
    }

    /// Refuse new renders and drop idle engines. In-flight renders finish.
    pub fn close(&self) {
        self.permits.close();
        self.idle.lock().clear();
    }

    async fn lease(&self) -> Result<EngineLease<'_>, RenderError> {
        let reusable = self.idle.lock().pop();
        let engine = match reusable {
            Some(engine) => engine,
            None => {
                let slot = self.created.fetch_add(1, Ordering::Relaxed);
                log::debug!("[RENDER] Starting engine #{}", slot);
                self.factory.create(slot).await.map_err(RenderError::Engine)?
            }
        };
        Ok(EngineLease {
            pool: self,
            engine: Some(engine),
            healthy: false,
        })
    }
}

/// Exclusive use of one engine for the duration of a render.
struct EngineLease<'a> {
    pool: &'a RenderPool,
    engine: Option<Box<dyn RenderEngine>>,
    healthy: bool,
}

impl EngineLease<'_> {
    fn mark_healthy(&mut self) {
        self.healthy = true;
    }
}

impl Drop for EngineLease<'_> {
    fn drop(&mut self) {
        let Some(engine) = self.engine.take() else {
            return;
        };
        if self.healthy && !self.pool.permits.is_closed() {
            self.pool.idle.lock().push(engine);
        }
    }
}

/// Headless Chromium, one profile directory per engine.
pub struct ChromiumEngine {
    binary: PathBuf,
    workdir: PathBuf,
}

impl ChromiumEngine {
    pub async fn new(binary: PathBuf, workdir: PathBuf) -> Result<Self, String> {
        tokio::fs::create_dir_all(workdir.join("profile"))
            .await
            .map_err(|e| format!("cannot create {}: {}", workdir.display(), e))?;
        Ok(Self { binary, workdir })
    }
}

#[async_trait]
impl RenderEngine for ChromiumEngine {
    async fn render(&mut self, html: &str) -> Result<Vec<u8>, String> {
        let input = self.workdir.join("page.html");
        let output = self.workdir.join("page.pdf");
        let _ = tokio::fs::remove_file(&output).await;
        tokio::fs::write(&input, html)
            .await
            .map_err(|e| format!("cannot write {}: {}", input.display(), e))?;

        // kill_on_drop: a timed-out render drops this future and takes the browser with it
        let result = tokio::process::Command::new(&self.binary)
            .arg("--headless")
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg(format!("--user-data-dir={}", self.workdir.join("profile").display()))
            .arg("--no-pdf-header-footer")
            .arg(format!("--print-to-pdf={}", output.display()))
            .arg(format!("file://{}", input.display()))
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| format!("failed to launch {}: {}", self.binary.display(), e))?;
        if !result.status.success() {
            return Err(format!(
                "chromium exited with {}: {}",
                result.status,
                String::from_utf8_lossy(&result.stderr).trim()
            ));
        }

        let pdf = tokio::fs::read(&output)
            .await
            .map_err(|e| format!("no PDF produced: {}", e))?;
        if !pdf.starts_with(b"%PDF") {
            return Err("chromium output is not a PDF".to_string());
        }
        Ok(pdf)
    }
}

impl Drop for ChromiumEngine {
    fn drop(&mut self) {
        let workdir = std::mem::take(&mut self.workdir);
        let remove = move || {
            if let Err(e) = std::fs::remove_dir_all(&workdir) {
                log::debug!("[RENDER] Could not remove {}: {}", workdir.display(), e);
            }
        };
        // engines are usually dropped on a runtime worker; keep the removal off it
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(remove);
            }
            Err(_) => remove(),
        }
    }
}

pub struct ChromiumFactory {
    binary: PathBuf,
    scratch_root: PathBuf,
}

impl ChromiumFactory {
    pub fn new(binary: PathBuf) -> Self {
        let scratch_root = std::env::temp_dir().join(format!("notes-render-{}", std::process::id()));
        Self::with_scratch_root(binary, scratch_root)
    }

    /// Engine profiles are created under `scratch_root`.
    pub fn with_scratch_root(binary: PathBuf, scratch_root: PathBuf) -> Self {
        Self { binary, scratch_root }
    }
}

#[async_trait]
impl EngineFactory for ChromiumFactory {
    async fn create(&self, slot: usize) -> Result<Box<dyn RenderEngine>, String> {
        let workdir = self.scratch_root.join(format!("engine-{}", slot));
        let engine = ChromiumEngine::new(self.binary.clone(), workdir).await?;
        Ok(Box::new(engine))
    }
}
