use serde_json::{Map, Value};
use std::process::Command;
use tracing::{debug, instrument, warn};

use rocml_core::{DeviceHandle, DriverError, DriverResult};

use super::DeviceDriver;

/// Device queries answered by the `rocm-smi` command line tool.
///
/// Every call spawns `rocm-smi ... --json`; nothing is held between calls,
/// so `shutdown` has nothing to release.
pub struct RocmSmi {
    program: String,
}

impl RocmSmi {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    #[instrument(skip(self), fields(program = %self.program))]
    fn query(&self, args: &[&str]) -> DriverResult<Value> {
        debug!("Querying rocm-smi");

        let output = Command::new(&self.program).args(args).arg("--json").output();

        match output {
            Ok(out) if out.status.success() => parse_json(&String::from_utf8_lossy(&out.stdout)),
            Ok(out) => {
                let stderr = String::from_utf8_lossy(&out.stderr);
                let stdout = String::from_utf8_lossy(&out.stdout);
                let err = classify_failure(&format!("{}{}", stderr, stdout));
                warn!("rocm-smi {:?} failed: {}", args, err);
                Err(err)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(
                DriverError::LibraryNotFound(format!("{} not found - is ROCm installed?", self.program)),
            ),
            Err(e) => Err(DriverError::Unknown(format!(
                "failed to execute {}: {}",
                self.program, e
            ))),
        }
    }

    fn card_query(&self, handle: DeviceHandle, args: &[&str]) -> DriverResult<Map<String, Value>> {
        let index = handle.index().to_string();
        let mut full = vec!["-d", index.as_str()];
        full.extend_from_slice(args);
        let json = self.query(&full)?;
        card_section(&json, handle.index()).cloned()
    }
}

impl DeviceDriver for RocmSmi {
    fn initialize(&self) -> DriverResult<()> {
        let json = self.query(&["--showdriverversion"])?;
        let version = json
            .get("system")
            .and_then(|system| system.as_object())
            .and_then(|system| field(system, &["Driver version"]).ok());
        debug!("ROCm driver version: {:?}", version);
        Ok(())
    }

    fn shutdown(&self) -> DriverResult<()> {
        Ok(())
    }

    fn device_count(&self) -> DriverResult<u32> {
        let json = self.query(&["--showid"])?;
        Ok(count_cards(&json))
    }

    fn name(&self, handle: DeviceHandle) -> DriverResult<String> {
        let card = self.card_query(handle, &["--showproductname"])?;
        field(&card, &["Card series", "Card model"])
    }

    fn memory_total(&self, handle: DeviceHandle) -> DriverResult<u64> {
        let card = self.card_query(handle, &["--showmeminfo", "vram"])?;
        parse_u64(&field(&card, &["VRAM Total Memory (B)"])?)
    }

    fn memory_used(&self, handle: DeviceHandle) -> DriverResult<u64> {
        let card = self.card_query(handle, &["--showmeminfo", "vram"])?;
        parse_u64(&field(&card, &["VRAM Total Used Memory (B)"])?)
    }

    fn utilization(&self, handle: DeviceHandle) -> DriverResult<u32> {
        let card = self.card_query(handle, &["--showuse"])?;
        let raw = field(&card, &["GPU use (%)"])?;
        let value = parse_u64(&raw)?;
        u32::try_from(value).map_err(|_| DriverError::Unknown(format!("utilization out of range: {}", value)))
    }

    fn unique_id(&self, handle: DeviceHandle) -> DriverResult<[u8; 16]> {
        let card = self.card_query(handle, &["--showuniqueid"])?;
        let id = parse_u64(&field(&card, &["Unique ID"])?)?;
        let mut bytes = [0u8; 16];
        bytes[8..].copy_from_slice(&id.to_be_bytes());
        Ok(bytes)
    }

    fn compute_process_ids(&self, handle: DeviceHandle) -> DriverResult<Vec<u32>> {
        let json = self.query(&["--showpidgpus"])?;
        Ok(pids_on_device(&json, handle.index()))
    }
}

/// rocm-smi may print warnings ahead of the JSON document
fn parse_json(stdout: &str) -> DriverResult<Value> {
    let start = stdout
        .find('{')
        .ok_or_else(|| DriverError::Unknown("rocm-smi produced no JSON output".to_string()))?;
    serde_json::from_str(&stdout[start..])
        .map_err(|e| DriverError::Unknown(format!("invalid rocm-smi JSON: {}", e)))
}

fn classify_failure(output: &str) -> DriverError {
    let lower = output.to_ascii_lowercase();
    let detail = output.trim().to_string();
    if lower.contains("not supported") {
        DriverError::NotSupported(detail)
    } else if lower.contains("driver") || lower.contains("amdgpu") {
        DriverError::DriverNotLoaded(detail)
    } else {
        DriverError::Unknown(detail)
    }
}

fn count_cards(json: &Value) -> u32 {
    json.as_object()
        .map(|root| root.keys().filter(|key| card_index(key).is_some()).count() as u32)
        .unwrap_or(0)
}

fn card_index(key: &str) -> Option<u32> {
    key.strip_prefix("card")?.parse().ok()
}

fn card_section(json: &Value, index: u32) -> DriverResult<&Map<String, Value>> {
    json.get(format!("card{}", index))
        .and_then(|card| card.as_object())
        .ok_or_else(|| DriverError::Unknown(format!("no card{} in rocm-smi output", index)))
}

/// First present key wins; keys compare case-insensitively
fn field(card: &Map<String, Value>, keys: &[&str]) -> DriverResult<String> {
    let found = keys.iter().find_map(|wanted| {
        card.iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(wanted))
            .map(|(_, value)| value)
    });

    let text = match found {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    };

    if text.is_empty() || text.eq_ignore_ascii_case("n/a") {
        return Err(DriverError::NotSupported(keys.join(" / ")));
    }
    Ok(text)
}

fn parse_u64(raw: &str) -> DriverResult<u64> {
    let raw = raw.trim();
    let parsed = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => raw.parse(),
    };
    parsed.map_err(|_| DriverError::Unknown(format!("unexpected numeric value {:?}", raw)))
}

/// `--showpidgpus` reports `{"system": {"PID1234": "0 1"}}`-style entries
fn pids_on_device(json: &Value, index: u32) -> Vec<u32> {
    let Some(system) = json.get("system").and_then(|s| s.as_object()) else {
        return Vec::new();
    };

    system
        .iter()
        .filter_map(|(key, value)| {
            let pid: u32 = key.trim_start_matches("PID").trim().parse().ok()?;
            let devices = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            devices
                .split(|c: char| !c.is_ascii_digit())
                .filter_map(|part| part.parse::<u32>().ok())
                .any(|device| device == index)
                .then_some(pid)
        })
        .collect()
}
