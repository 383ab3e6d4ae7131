use serde::Serialize;

use vtest_core::VtestConfig;
use vtest_transport::{Renderer, RendererError, VtestRenderer};

/// Timeout for the smoke wait; the counter is already past the target.
const WAIT_TIMEOUT_NS: u64 = 1_000_000_000;

const BLOB_SIZE: u64 = 64 * 1024;

// ── Check result types ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "lowercase")]
enum CheckStatus {
    Pass,
    Fail,
    Skip,
}

#[derive(Debug, Serialize)]
struct CheckResult {
    name: String,
    status: CheckStatus,
    message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    details: Vec<String>,
}

impl CheckResult {
    fn pass(name: &str, message: &str) -> Self {
        Self::new(name, CheckStatus::Pass, message)
    }

    fn fail(name: &str, message: &str) -> Self {
        Self::new(name, CheckStatus::Fail, message)
    }

    fn skip(name: &str, message: &str) -> Self {
        Self::new(name, CheckStatus::Skip, message)
    }

    fn new(name: &str, status: CheckStatus, message: &str) -> Self {
        Self {
            name: name.to_string(),
            status,
            message: message.to_string(),
            details: Vec::new(),
        }
    }

    fn detail(mut self, detail: &str) -> Self {
        self.details.push(detail.to_string());
        self
    }
}

// ── Main entry point ────────────────────────────────────────────────────────

pub fn run_smoke(config: &VtestConfig, json: bool) -> anyhow::Result<()> {
    let mut results: Vec<CheckResult> = Vec::new();

    let renderer = check_connect(config, &mut results);
    match renderer {
        Some(ref renderer) => {
            check_sync(renderer, &mut results);
            check_blob(renderer, &mut results);
        }
        None => {
            results.push(CheckResult::skip("Timeline sync", "Not connected"));
            results.push(CheckResult::skip("Mappable blob", "Not connected"));
        }
    }
    drop(renderer);

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        print_results_pretty(&results);
    }

    if results
        .iter()
        .any(|r| matches!(r.status, CheckStatus::Fail))
    {
        std::process::exit(1);
    }

    Ok(())
}

// ── Check 1: Handshake ──────────────────────────────────────────────────────

fn check_connect(config: &VtestConfig, results: &mut Vec<CheckResult>) -> Option<VtestRenderer> {
    match VtestRenderer::connect(config) {
        Ok(renderer) => {
            let info = renderer.info();
            results.push(
                CheckResult::pass(
                    "Handshake",
                    &format!("Connected to {}", config.socket_path),
                )
                .detail(&format!("Protocol version {}", renderer.protocol_version()))
                .detail(&format!("{} sync queues", info.max_sync_queue_count))
                .detail(&format!("Wire format {}", info.wire_format_version)),
            );
            Some(renderer)
        }
        Err(e) => {
            results.push(
                CheckResult::fail("Handshake", &e.to_string())
                    .detail(&format!("Socket: {}", config.socket_path))
                    .detail("Is the render server running?"),
            );
            None
        }
    }
}

// ── Check 2: Timeline sync ──────────────────────────────────────────────────

fn check_sync(renderer: &VtestRenderer, results: &mut Vec<CheckResult>) {
    match sync_cycle(renderer) {
        Ok(sync_id) => results.push(
            CheckResult::pass("Timeline sync", "create/write/read/wait round trip")
                .detail(&format!("sync id {}", sync_id)),
        ),
        Err(e) => results.push(CheckResult::fail("Timeline sync", &e)),
    }
}

fn sync_cycle(renderer: &VtestRenderer) -> Result<u32, String> {
    let sync = renderer.sync_create(1).map_err(|e| e.to_string())?;
    let sync_id = sync.sync_id();

    sync.write(5).map_err(|e| e.to_string())?;
    let value = sync.read().map_err(|e| e.to_string())?;
    if value != 5 {
        return Err(format!("read back {} after writing 5", value));
    }

    match renderer.wait_one(&sync, 5, WAIT_TIMEOUT_NS) {
        Ok(()) => {}
        Err(RendererError::Timeout) => return Err("wait on a reached value timed out".into()),
        Err(e) => return Err(format!("wait failed: {}", e)),
    }

    sync.release();
    Ok(sync_id)
}

// ── Check 3: Mappable blob ──────────────────────────────────────────────────

fn check_blob(renderer: &VtestRenderer, results: &mut Vec<CheckResult>) {
    match blob_round_trip(renderer) {
        Ok(res_id) => results.push(
            CheckResult::pass("Mappable blob", "create/map/write/read/destroy")
                .detail(&format!("res id {}, {} bytes", res_id, BLOB_SIZE)),
        ),
        Err(e) => results.push(CheckResult::fail("Mappable blob", &e)),
    }
}

fn blob_round_trip(renderer: &VtestRenderer) -> Result<u32, String> {
    let bo = renderer
        .bo_create_cpu(BLOB_SIZE)
        .map_err(|e| e.to_string())?;
    let res_id = bo.res_id();
    let ptr = bo.map().map_err(|e| format!("map failed: {}", e))?;

    let len = BLOB_SIZE as usize;
    // SAFETY: the mapping is `len` bytes and lives until `destroy`.
    let mapped = unsafe { std::slice::from_raw_parts_mut(ptr.as_ptr(), len) };
    for (i, byte) in mapped.iter_mut().enumerate() {
        *byte = (i % 251) as u8;
    }
    bo.flush();
    bo.invalidate();
    if let Some(offset) = mapped.iter().enumerate().position(|(i, &b)| b != (i % 251) as u8) {
        return Err(format!("mapping mismatch at offset {}", offset));
    }

    bo.destroy();
    Ok(res_id)
}

// ── Output formatters ───────────────────────────────────────────────────────

fn print_results_pretty(results: &[CheckResult]) {
    println!();
    println!("vtest smoke test");
    println!("================");
    println!();

    let mut pass_count = 0u32;
    let mut fail_count = 0u32;

    for result in results {
        let (icon, color_start, color_end) = match result.status {
            CheckStatus::Pass => {
                pass_count += 1;
                ("[PASS]", "\x1b[32m", "\x1b[0m")
            }
            CheckStatus::Fail => {
                fail_count += 1;
                ("[FAIL]", "\x1b[31m", "\x1b[0m")
            }
            CheckStatus::Skip => ("[SKIP]", "\x1b[90m", "\x1b[0m"),
        };

        println!(
            "  {}{}{} {} - {}",
            color_start, icon, color_end, result.name, result.message
        );

        for detail in &result.details {
            println!("         {}", detail);
        }
        println!();
    }

    println!("----------------");
    println!("  {} passed, {} failed", pass_count, fail_count);
    println!();
}
