//! WebAssembly sandbox for user-supplied script steps
//!
//! Scripts are core wasm modules (binary or WAT text) instantiated against an
//! empty linker, so a module that imports anything fails to instantiate: no
//! filesystem, network, clock or process access. Each call gets a fresh
//! store with a memory cap, an optional fuel cap and an epoch deadline. A
//! background ticker advances the engine epoch, so an infinite loop traps
//! once the wall-clock budget is spent regardless of what the guest does.
//!
//! Guest ABI:
//! - export `memory`
//! - export `alloc(len: i32) -> i32`, returning a buffer the host writes the
//!   JSON input into
//! - export `run(ptr: i32, len: i32) -> i64`, returning `(out_ptr << 32) |
//!   out_len`; the output is JSON, or plain text

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use wasmtime::{Config, Engine, Linker, Module, Store, StoreLimits, StoreLimitsBuilder, Trap};

const EPOCH_TICK: Duration = Duration::from_millis(10);

/// Extra time the host waits for the blocking worker after the budget
const GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Wall-clock budget per script run
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_max_memory_bytes")]
    pub max_memory_bytes: usize,

    /// Instruction fuel per run; `None` disables fuel metering
    #[serde(default = "default_max_fuel")]
    pub max_fuel: Option<u64>,

    /// Directory `script.run` may load module files from. Unset disables
    /// file scripts.
    #[serde(default)]
    pub script_dir: Option<PathBuf>,
}

fn default_timeout_ms() -> u64 {
    5_000
}

fn default_max_memory_bytes() -> usize {
    16 * 1024 * 1024
}

fn default_max_fuel() -> Option<u64> {
    Some(1_000_000_000)
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            max_memory_bytes: default_max_memory_bytes(),
            max_fuel: default_max_fuel(),
            script_dir: None,
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum SandboxError {
    #[error("failed to create wasm engine: {0}")]
    Engine(String),

    #[error("failed to compile script: {0}")]
    Compile(String),

    #[error("failed to instantiate script (host imports are not available): {0}")]
    Instantiate(String),

    #[error("script does not follow the guest ABI: {0}")]
    Abi(String),

    #[error("script trapped: {0}")]
    Trap(String),

    #[error("script exceeded its wall-clock budget of {0:?}")]
    Timeout(Duration),

    #[error("script ran out of fuel")]
    FuelExhausted,

    #[error("invalid script input: {0}")]
    Input(String),

    #[error("script worker crashed: {0}")]
    Crashed(String),
}

/// Advances the engine epoch until dropped
struct EpochTicker {
    stop: Arc<AtomicBool>,
}

impl EpochTicker {
    fn start(engine: Engine) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        std::thread::spawn(move || {
            while !flag.load(Ordering::Relaxed) {
                std::thread::sleep(EPOCH_TICK);
                engine.increment_epoch();
            }
        });
        Self { stop }
    }
}

impl Drop for EpochTicker {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

pub struct ScriptSandbox {
    engine: Engine,
    config: SandboxConfig,
    _ticker: EpochTicker,
}

impl ScriptSandbox {
    pub fn new(config: SandboxConfig) -> Result<Self, SandboxError> {
        let mut wasm_config = Config::new();
        wasm_config.epoch_interruption(true);
        wasm_config.consume_fuel(config.max_fuel.is_some());
        wasm_config.wasm_threads(false);

        let engine = Engine::new(&wasm_config).map_err(|e| SandboxError::Engine(e.to_string()))?;
        let ticker = EpochTicker::start(engine.clone());

        Ok(Self {
            engine,
            config,
            _ticker: ticker,
        })
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    pub fn budget(&self) -> Duration {
        Duration::from_millis(self.config.timeout_ms)
    }

    /// Run a script on a blocking thread under the configured budget
    pub async fn run(&self, module: Vec<u8>, input: &Value) -> Result<Value, SandboxError> {
        let input = serde_json::to_vec(input).map_err(|e| SandboxError::Input(e.to_string()))?;
        let engine = self.engine.clone();
        let config = self.config.clone();
        let budget = self.budget();

        let task = tokio::task::spawn_blocking(move || execute(&engine, &config, &module, &input));

        match tokio::time::timeout(budget + GRACE, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(SandboxError::Crashed(join_error.to_string())),
            Err(_) => {
                warn!(budget_ms = self.config.timeout_ms, "Script worker did not stop within its budget");
                Err(SandboxError::Timeout(budget))
            }
        }
    }
}

fn execute(
    engine: &Engine,
    config: &SandboxConfig,
    module: &[u8],
    input: &[u8],
) -> Result<Value, SandboxError> {
    let start = Instant::now();
    let budget = Duration::from_millis(config.timeout_ms);

    // Text diagnostics quote the offending source line; keep the message only
    let module = Module::new(engine, module).map_err(|e| {
        let message = e.to_string();
        SandboxError::Compile(message.lines().next().unwrap_or_default().trim().to_string())
    })?;

    let limits = StoreLimitsBuilder::new()
        .memory_size(config.max_memory_bytes)
        .instances(1)
        .build();
    let mut store: Store<StoreLimits> = Store::new(engine, limits);
    store.limiter(|limits| limits);

    if let Some(fuel) = config.max_fuel {
        store
            .set_fuel(fuel)
            .map_err(|e| SandboxError::Engine(e.to_string()))?;
    }
    let ticks = (config.timeout_ms / EPOCH_TICK.as_millis() as u64).max(1);
    store.set_epoch_deadline(ticks);

    // Empty linker: every import is unresolved
    let linker: Linker<StoreLimits> = Linker::new(engine);
    let instance = linker
        .instantiate(&mut store, &module)
        .map_err(|e| classify(e, start, budget, SandboxError::Instantiate))?;

    let memory = instance
        .get_memory(&mut store, "memory")
        .ok_or_else(|| SandboxError::Abi("missing exported memory 'memory'".to_string()))?;
    let alloc = instance
        .get_typed_func::<i32, i32>(&mut store, "alloc")
        .map_err(|e| SandboxError::Abi(format!("alloc: {}", e)))?;
    let run = instance
        .get_typed_func::<(i32, i32), i64>(&mut store, "run")
        .map_err(|e| SandboxError::Abi(format!("run: {}", e)))?;

    let len = i32::try_from(input.len())
        .map_err(|_| SandboxError::Input("input larger than guest address space".to_string()))?;
    let ptr = alloc
        .call(&mut store, len)
        .map_err(|e| classify(e, start, budget, SandboxError::Trap))?;
    memory
        .write(&mut store, ptr as u32 as usize, input)
        .map_err(|e| SandboxError::Abi(format!("input buffer out of bounds: {}", e)))?;

    let packed = run
        .call(&mut store, (ptr, len))
        .map_err(|e| classify(e, start, budget, SandboxError::Trap))?;

    let out_ptr = ((packed as u64) >> 32) as usize;
    let out_len = ((packed as u64) & 0xffff_ffff) as usize;
    let mut output = vec![0u8; out_len];
    memory
        .read(&store, out_ptr, &mut output)
        .map_err(|e| SandboxError::Abi(format!("output buffer out of bounds: {}", e)))?;

    debug!(
        elapsed_ms = start.elapsed().as_millis() as u64,
        output_len = out_len,
        "Script finished"
    );

    Ok(decode_output(output))
}

fn decode_output(output: Vec<u8>) -> Value {
    if output.is_empty() {
        return Value::Null;
    }
    match serde_json::from_slice(&output) {
        Ok(value) => value,
        Err(_) => Value::String(String::from_utf8_lossy(&output).into_owned()),
    }
}

fn classify(
    error: wasmtime::Error,
    start: Instant,
    budget: Duration,
    otherwise: fn(String) -> SandboxError,
) -> SandboxError {
    match error.downcast_ref::<Trap>() {
        Some(Trap::Interrupt) => SandboxError::Timeout(budget),
        Some(Trap::OutOfFuel) => SandboxError::FuelExhausted,
        _ if start.elapsed() >= budget => SandboxError::Timeout(budget),
        _ => otherwise(format!("{:#}", error)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // Echoes its input back: alloc hands out a fixed buffer at 1024
    const ECHO_WAT: &str = r#"
        (module
          (memory (export "memory") 1)
          (func (export "alloc") (param i32) (result i32) i32.const 1024)
          (func (export "run") (param $ptr i32) (param $len i32) (result i64)
            (i64.or
              (i64.shl (i64.extend_i32_u (local.get $ptr)) (i64.const 32))
              (i64.extend_i32_u (local.get $len)))))
    "#;

    #[tokio::test]
    async fn test_echo_round_trips_json() {
        let sandbox = ScriptSandbox::new(SandboxConfig::default()).unwrap();
        let out = sandbox
            .run(ECHO_WAT.as_bytes().to_vec(), &json!({ "n": [1, 2, 3] }))
            .await
            .unwrap();
        assert_eq!(out, json!({ "n": [1, 2, 3] }));
    }

    #[tokio::test]
    async fn test_missing_exports_is_abi_error() {
        let sandbox = ScriptSandbox::new(SandboxConfig::default()).unwrap();
        let err = sandbox
            .run(b"(module (memory (export \"memory\") 1))".to_vec(), &json!(null))
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::Abi(_)));
    }

    #[tokio::test]
    async fn test_invalid_module_fails_to_compile() {
        let sandbox = ScriptSandbox::new(SandboxConfig::default()).unwrap();
        let err = sandbox
            .run(b"not a module".to_vec(), &json!(null))
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::Compile(_)));
    }

    #[tokio::test]
    async fn test_compile_error_does_not_quote_source() {
        let sandbox = ScriptSandbox::new(SandboxConfig::default()).unwrap();
        let err = sandbox
            .run(b"db_password=hunter2".to_vec(), &json!(null))
            .await
            .unwrap_err();
        let message = err.to_string();
        assert!(message.starts_with("failed to compile script"));
        assert!(!message.contains("hunter2"));
        assert!(!message.contains('\n'));
    }

    #[test]
    fn test_plain_text_output() {
        assert_eq!(decode_output(b"hello".to_vec()), json!("hello"));
        assert_eq!(decode_output(b"42".to_vec()), json!(42));
        assert_eq!(decode_output(Vec::new()), Value::Null);
    }
}
