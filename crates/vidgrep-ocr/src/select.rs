use std::fmt;
use std::str::FromStr;

use vidgrep_types::{FrameError, LumaFrame};

use crate::backends::worker::Device;
use crate::engine::DynOcrEngine;
use crate::error::OcrError;

const SELF_TEST_EDGE: u32 = 32;

/// Requested compute selection. `Auto` tries the accelerator first and falls
/// back to CPU; a pinned device never falls over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DevicePreference {
    #[default]
    Auto,
    Gpu,
    Cpu,
}

impl DevicePreference {
    pub fn as_str(&self) -> &'static str {
        match self {
            DevicePreference::Auto => "auto",
            DevicePreference::Gpu => "gpu",
            DevicePreference::Cpu => "cpu",
        }
    }

    fn candidates(&self) -> &'static [Device] {
        match self {
            DevicePreference::Auto => &[Device::Gpu, Device::Cpu],
            DevicePreference::Gpu => &[Device::Gpu],
            DevicePreference::Cpu => &[Device::Cpu],
        }
    }
}

impl FromStr for DevicePreference {
    type Err = FrameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(DevicePreference::Auto),
            "gpu" => Ok(DevicePreference::Gpu),
            "cpu" => Ok(DevicePreference::Cpu),
            other => Err(FrameError::configuration(format!(
                "unknown OCR device '{other}' (expected auto, gpu, or cpu)"
            ))),
        }
    }
}

impl fmt::Display for DevicePreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operator-facing diagnosis of why a device was rejected. Classification
/// never drives control flow; the fallback order is fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    MissingDependency,
    AcceleratorUnavailable,
    Other,
}

impl FailureClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureClass::MissingDependency => "missing-dependency",
            FailureClass::AcceleratorUnavailable => "accelerator-unavailable",
            FailureClass::Other => "other",
        }
    }
}

#[derive(Debug)]
pub struct InitFailure {
    pub device: Device,
    pub class: FailureClass,
    pub message: String,
}

pub struct EngineSelection {
    pub engine: DynOcrEngine,
    pub device: Device,
    /// Devices rejected before this one succeeded, in attempt order.
    pub rejected: Vec<InitFailure>,
}

impl fmt::Debug for EngineSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineSelection")
            .field("engine", &self.engine.name())
            .field("device", &self.device)
            .field("rejected", &self.rejected)
            .finish()
    }
}

pub fn classify_failure(message: &str) -> FailureClass {
    let lowered = message.to_ascii_lowercase();
    let missing_markers = [
        "cudnn",
        "cublas",
        "cannot open shared object",
        "library not found",
    ];
    if missing_markers.iter().any(|marker| lowered.contains(marker)) {
        return FailureClass::MissingDependency;
    }
    let accelerator_markers = ["cuda", "gpu", "accelerator", "device"];
    if accelerator_markers
        .iter()
        .any(|marker| lowered.contains(marker))
    {
        return FailureClass::AcceleratorUnavailable;
    }
    FailureClass::Other
}

/// Builds an engine for the preferred device, degrading along the fallback
/// order when construction, warm-up, or the blank-frame self-test fails.
pub fn initialize_engine<F>(
    preference: DevicePreference,
    build: F,
) -> Result<EngineSelection, OcrError>
where
    F: Fn(Device) -> Result<DynOcrEngine, OcrError>,
{
    let mut rejected = Vec::new();
    for device in preference.candidates() {
        match try_device(*device, &build) {
            Ok(engine) => {
                return Ok(EngineSelection {
                    engine,
                    device: *device,
                    rejected,
                });
            }
            Err(err) => {
                let message = err.to_string();
                rejected.push(InitFailure {
                    device: *device,
                    class: classify_failure(&message),
                    message,
                });
            }
        }
    }
    Err(OcrError::Unavailable { attempts: rejected })
}

fn try_device<F>(device: Device, build: &F) -> Result<DynOcrEngine, OcrError>
where
    F: Fn(Device) -> Result<DynOcrEngine, OcrError>,
{
    let engine = build(device)?;
    engine.warm_up()?;
    self_test(&engine)?;
    Ok(engine)
}

// A device only counts as usable once it has produced a well-formed reply for
// a blank frame.
fn self_test(engine: &DynOcrEngine) -> Result<(), OcrError> {
    let edge = SELF_TEST_EDGE;
    let frame = LumaFrame::from_owned(
        edge,
        edge,
        edge as usize,
        None,
        vec![0u8; (edge * edge) as usize],
    )
    .map_err(|err| OcrError::backend(engine.name(), err.to_string()))?;
    engine.recognize(&frame)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::mock::MockOcrEngine;
    use std::sync::Arc;

    #[test]
    fn classification_spots_missing_cudnn() {
        let class = classify_failure("libcudnn.so.8: cannot open shared object file");
        assert_eq!(class, FailureClass::MissingDependency);
    }

    #[test]
    fn classification_spots_unavailable_accelerator() {
        assert_eq!(
            classify_failure("CUDA driver version is insufficient"),
            FailureClass::AcceleratorUnavailable
        );
        assert_eq!(
            classify_failure("no CUDA-capable device detected"),
            FailureClass::AcceleratorUnavailable
        );
    }

    #[test]
    fn classification_defaults_to_other() {
        assert_eq!(
            classify_failure("worker exited (signal: 6)"),
            FailureClass::Other
        );
    }

    #[test]
    fn auto_falls_back_to_cpu() {
        let selection = initialize_engine(DevicePreference::Auto, |device| match device {
            Device::Gpu => Err(OcrError::backend(
                "worker-gpu",
                "no CUDA-capable device detected",
            )),
            Device::Cpu => Ok(Arc::new(MockOcrEngine::new()) as DynOcrEngine),
        })
        .unwrap();
        assert_eq!(selection.device, Device::Cpu);
        assert_eq!(selection.rejected.len(), 1);
        assert_eq!(
            selection.rejected[0].class,
            FailureClass::AcceleratorUnavailable
        );
    }

    #[test]
    fn warm_up_failure_triggers_fallback() {
        let selection = initialize_engine(DevicePreference::Auto, |device| {
            let engine = MockOcrEngine::new();
            if device == Device::Gpu {
                engine.fail_warm_up("libcudnn.so.8: cannot open shared object file");
            }
            Ok(Arc::new(engine) as DynOcrEngine)
        })
        .unwrap();
        assert_eq!(selection.device, Device::Cpu);
        assert_eq!(selection.rejected[0].class, FailureClass::MissingDependency);
    }

    #[test]
    fn self_test_failure_triggers_fallback() {
        let selection = initialize_engine(DevicePreference::Auto, |device| {
            let engine = MockOcrEngine::new();
            if device == Device::Gpu {
                engine.push_backend_error("worker crashed during inference");
            }
            Ok(Arc::new(engine) as DynOcrEngine)
        })
        .unwrap();
        assert_eq!(selection.device, Device::Cpu);
        assert_eq!(selection.rejected.len(), 1);
    }

    #[test]
    fn pinned_device_never_falls_over() {
        let err = initialize_engine(DevicePreference::Gpu, |device| match device {
            Device::Gpu => Err(OcrError::backend("worker-gpu", "no CUDA-capable device")),
            Device::Cpu => Ok(Arc::new(MockOcrEngine::new()) as DynOcrEngine),
        })
        .unwrap_err();
        let OcrError::Unavailable { attempts } = err else {
            panic!("expected unavailable");
        };
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].device, Device::Gpu);
    }

    #[test]
    fn exhausted_devices_report_every_attempt() {
        let err = initialize_engine(DevicePreference::Auto, |device| {
            Err(OcrError::backend(
                match device {
                    Device::Gpu => "worker-gpu",
                    Device::Cpu => "worker-cpu",
                },
                "spawn failed",
            ))
        })
        .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("gpu"));
        assert!(message.contains("cpu"));
    }
}
