use std::sync::Arc;

use crate::error::ExecError;
use crate::tlw::{Access, VersionRequest, VersionType};

/// Versions reported for a ChromeOS device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrosVersionInfo {
    pub os_image: String,
    pub fw_image: String,
    pub fw_version: String,
}

#[derive(Clone)]
pub struct Versioner {
    access: Arc<dyn Access>,
    resource: String,
}

impl Versioner {
    pub fn new(access: Arc<dyn Access>, resource: impl Into<String>) -> Self {
        Self {
            access,
            resource: resource.into(),
        }
    }

    /// Stable versions for the resource.
    pub async fn cros(&self) -> Result<CrosVersionInfo, ExecError> {
        let values = self
            .access
            .version(VersionRequest {
                resource: self.resource.clone(),
                version_type: VersionType::Cros,
            })
            .await
            .map_err(|e| ExecError::from(e).annotate("cros version"))?;
        let field = |key: &str| values.get(key).cloned().unwrap_or_default();
        let info = CrosVersionInfo {
            os_image: field("os_image"),
            fw_image: field("fw_image"),
            fw_version: field("fw_version"),
        };
        if info.os_image.is_empty() {
            return Err(ExecError::new(format!(
                "cros version for {:?}: os image is not specified",
                self.resource
            )));
        }
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tlw::MockAccess;

    #[tokio::test]
    async fn test_cros_version() {
        let access = MockAccess::new();
        access.set_version("dut-1", "os_image", "octopus-release/R120-15662.0.0");
        access.set_version("dut-1", "fw_version", "Google_Octopus.11297.1");
        let info = Versioner::new(Arc::new(access), "dut-1").cros().await.unwrap();
        assert_eq!(info.os_image, "octopus-release/R120-15662.0.0");
        assert_eq!(info.fw_version, "Google_Octopus.11297.1");
        assert!(info.fw_image.is_empty());
    }

    #[tokio::test]
    async fn test_missing_os_image() {
        let access = MockAccess::new();
        access.set_version("dut-1", "fw_image", "x");
        let err = Versioner::new(Arc::new(access), "dut-1").cros().await.unwrap_err();
        assert!(err.message().contains("os image"));
    }
}
