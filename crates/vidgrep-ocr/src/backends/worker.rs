use std::fmt;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use vidgrep_types::LumaFrame;

use crate::engine::OcrEngine;
use crate::error::OcrError;
use crate::payload::{RecognitionPayload, parse_payload};

/// Compute selection passed to the worker process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Gpu,
    Cpu,
}

impl Device {
    pub fn as_str(&self) -> &'static str {
        match self {
            Device::Gpu => "gpu",
            Device::Cpu => "cpu",
        }
    }

    fn engine_name(&self) -> &'static str {
        match self {
            Device::Gpu => "worker-gpu",
            Device::Cpu => "worker-cpu",
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub program: PathBuf,
    pub device: Device,
    pub language: Option<String>,
    pub extra_args: Vec<String>,
}

impl WorkerConfig {
    pub fn new(program: impl Into<PathBuf>, device: Device) -> Self {
        Self {
            program: program.into(),
            device,
            language: None,
            extra_args: Vec::new(),
        }
    }
}

/// Recognition engine backed by an external worker process.
///
/// Protocol: one JSON header line plus the raw luma plane on stdin, one JSON
/// reply line on stdout. The worker owns detection and decoding; this side
/// owns shape normalization.
#[derive(Debug)]
pub struct WorkerOcrEngine {
    device: Device,
    process: Mutex<WorkerProcess>,
}

#[derive(Debug)]
struct WorkerProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    stderr: Option<ChildStderr>,
}

#[derive(Serialize)]
struct RecognizeHeader {
    op: &'static str,
    width: u32,
    height: u32,
    stride: usize,
}

#[derive(Serialize)]
struct PingHeader {
    op: &'static str,
}

#[derive(Deserialize)]
struct PingReply {
    ok: bool,
}

impl WorkerOcrEngine {
    pub fn spawn(config: &WorkerConfig) -> Result<Self, OcrError> {
        let mut command = Command::new(&config.program);
        command.arg("--device").arg(config.device.as_str());
        if let Some(language) = &config.language {
            command.arg("--lang").arg(language);
        }
        command.args(&config.extra_args);
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command.spawn()?;
        let name = config.device.engine_name();
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| OcrError::backend(name, "worker stdin was not piped"))?;
        let stdout = child
            .stdout
            .take()
            .map(BufReader::new)
            .ok_or_else(|| OcrError::backend(name, "worker stdout was not piped"))?;
        let stderr = child.stderr.take();

        Ok(Self {
            device: config.device,
            process: Mutex::new(WorkerProcess {
                child,
                stdin,
                stdout,
                stderr,
            }),
        })
    }

    pub fn device(&self) -> Device {
        self.device
    }

    fn exchange(&self, write: impl FnOnce(&mut ChildStdin) -> std::io::Result<()>) -> Result<String, OcrError> {
        let name = self.device.engine_name();
        let mut process = self
            .process
            .lock()
            .map_err(|_| OcrError::backend(name, "worker mutex poisoned"))?;
        write(&mut process.stdin)?;
        process.stdin.flush()?;

        let mut line = String::new();
        let read = process.stdout.read_line(&mut line)?;
        if read == 0 {
            return Err(process.exit_error(name));
        }
        Ok(line)
    }
}

impl WorkerProcess {
    /// Turns an unexpected stdout EOF into a diagnosable backend error.
    fn exit_error(&mut self, name: &'static str) -> OcrError {
        let status = self
            .child
            .wait()
            .map(|status| status.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        let mut detail = String::new();
        if let Some(stderr) = self.stderr.as_mut() {
            let mut tail = String::new();
            if stderr.read_to_string(&mut tail).is_ok() && !tail.trim().is_empty() {
                let tail = tail.trim();
                let mut start = tail.len().saturating_sub(512);
                while !tail.is_char_boundary(start) {
                    start += 1;
                }
                detail = format!(": {}", &tail[start..]);
            }
        }
        OcrError::backend(name, format!("worker exited ({status}){detail}"))
    }
}

impl Drop for WorkerProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl OcrEngine for WorkerOcrEngine {
    fn name(&self) -> &'static str {
        self.device.engine_name()
    }

    fn warm_up(&self) -> Result<(), OcrError> {
        let header = serde_json::to_string(&PingHeader { op: "ping" })
            .map_err(|err| OcrError::backend(self.device.engine_name(), err.to_string()))?;
        let line = self.exchange(move |stdin| writeln!(stdin, "{header}"))?;
        let reply: PingReply = serde_json::from_str(line.trim()).map_err(|err| {
            OcrError::backend(
                self.device.engine_name(),
                format!("ping reply did not parse: {err}"),
            )
        })?;
        if !reply.ok {
            return Err(OcrError::backend(
                self.device.engine_name(),
                "worker refused ping",
            ));
        }
        Ok(())
    }

    fn recognize(&self, frame: &LumaFrame) -> Result<RecognitionPayload, OcrError> {
        let name = self.device.engine_name();
        let header = serde_json::to_string(&RecognizeHeader {
            op: "recognize",
            width: frame.width(),
            height: frame.height(),
            stride: frame.stride(),
        })
        .map_err(|err| OcrError::backend(name, err.to_string()))?;
        let plane_len = frame.stride() * frame.height() as usize;
        let plane = &frame.data()[..plane_len];

        let line = self.exchange(move |stdin| {
            writeln!(stdin, "{header}")?;
            stdin.write_all(plane)
        })?;

        let value: Value = serde_json::from_str(line.trim())
            .map_err(|err| OcrError::parse(format!("reply is not valid JSON: {err}")))?;
        if let Some(message) = worker_reported_error(&value) {
            return Err(OcrError::backend(name, message));
        }
        parse_payload(&value)
    }
}

// Workers report their own failures as {"error": "..."} instead of a result
// shape; that is a backend fault, not a malformed frame.
fn worker_reported_error(value: &Value) -> Option<String> {
    value
        .as_object()
        .and_then(|object| object.get("error"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_names_are_stable() {
        assert_eq!(Device::Gpu.as_str(), "gpu");
        assert_eq!(Device::Cpu.as_str(), "cpu");
        assert_ne!(Device::Gpu.engine_name(), Device::Cpu.engine_name());
    }

    #[test]
    fn spawn_failure_surfaces_as_io() {
        let config = WorkerConfig::new("/nonexistent/vidgrep-ocr-worker", Device::Cpu);
        let err = WorkerOcrEngine::spawn(&config).unwrap_err();
        assert!(matches!(err, OcrError::Io(_)));
    }

    #[cfg(unix)]
    #[test]
    fn echoing_worker_fails_ping_without_hanging() {
        // `cat` echoes the ping header back, which is not a valid ping reply.
        let config = WorkerConfig::new("/bin/cat", Device::Cpu);
        let engine = WorkerOcrEngine::spawn(&config).unwrap();
        let err = engine.warm_up().unwrap_err();
        assert!(matches!(err, OcrError::Backend { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn echoed_recognize_header_is_a_parse_error() {
        let config = WorkerConfig::new("/bin/cat", Device::Cpu);
        let engine = WorkerOcrEngine::spawn(&config).unwrap();
        let frame = LumaFrame::from_owned(8, 8, 8, None, vec![0; 64]).unwrap();
        let err = engine.recognize(&frame).unwrap_err();
        assert!(err.is_parse());
    }
}
