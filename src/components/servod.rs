//! Client side of the servod daemon running on a servo host.

use std::sync::Arc;
use std::time::Duration;

use crate::error::ExecError;
use crate::tlw::{Access, CallServodRequest, ServodMethod, XmlRpcValue};

const DEFAULT_SERVOD_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct Servod {
    access: Arc<dyn Access>,
    resource: String,
    port: u16,
    timeout: Duration,
}

impl Servod {
    pub fn new(access: Arc<dyn Access>, resource: impl Into<String>, port: u16) -> Self {
        Self {
            access,
            resource: resource.into(),
            port,
            timeout: DEFAULT_SERVOD_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Call a servod method; a fault response becomes an error.
    pub async fn call(
        &self,
        method: ServodMethod,
        args: Vec<XmlRpcValue>,
    ) -> Result<XmlRpcValue, ExecError> {
        let control = args.first().map(|a| a.to_string()).unwrap_or_default();
        let resp = self
            .access
            .call_servod(CallServodRequest {
                resource: self.resource.clone(),
                method,
                args,
                timeout: self.timeout,
            })
            .await;
        if resp.fault {
            return Err(ExecError::new(format!(
                "servod {} {control:?} on {:?}:{}: {}",
                method.as_str(),
                self.resource,
                self.port,
                resp.value
            )));
        }
        Ok(resp.value)
    }

    pub async fn get(&self, control: &str) -> Result<XmlRpcValue, ExecError> {
        self.call(ServodMethod::Get, vec![control.into()]).await
    }

    pub async fn set(
        &self,
        control: &str,
        value: impl Into<XmlRpcValue>,
    ) -> Result<(), ExecError> {
        self.call(ServodMethod::Set, vec![control.into(), value.into()])
            .await
            .map(|_| ())
    }

    /// Succeeds when servod knows the control.
    pub async fn has(&self, control: &str) -> Result<(), ExecError> {
        self.call(ServodMethod::Doc, vec![control.into()])
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tlw::MockAccess;

    #[tokio::test]
    async fn test_get_set() {
        let access = MockAccess::new();
        access.set_servod_control("ec_board", "octopus");
        let servod = Servod::new(Arc::new(access.clone()), "servo-1", 9999);

        assert_eq!(
            servod.get("ec_board").await.unwrap(),
            XmlRpcValue::String("octopus".into())
        );
        servod.set("power_state", "reset").await.unwrap();
        assert_eq!(
            access.servod_control("power_state"),
            Some(XmlRpcValue::String("reset".into()))
        );
    }

    #[tokio::test]
    async fn test_fault_is_error() {
        let access = MockAccess::new();
        let servod = Servod::new(Arc::new(access), "servo-1", 9999);
        let err = servod.get("missing").await.unwrap_err();
        assert!(err.message().contains("servod get"));
        assert!(servod.has("missing").await.is_err());
    }
}
