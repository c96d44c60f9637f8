//! Built-in handlers, one per `JobKind`.
//!
//! Each handler is a stateless unit struct; everything it talks to comes
//! from the `JobContext`.

pub mod configure_host;
pub mod deploy_app;
pub mod deploy_stack;
pub mod provision_host;
pub mod register_dns;
pub mod remote_exec;

#[cfg(test)]
pub(crate) mod fakes;

pub use configure_host::{ConfigureHost, ConfigureHostHandler};
pub use deploy_app::{DeployApp, DeployAppHandler, DeployAppResult};
pub use deploy_stack::{DeployStack, DeployStackHandler};
pub use provision_host::{DnsRecordSpec, ProvisionHost, ProvisionHostHandler, ProvisionedHost};
pub use register_dns::{RegisterDns, RegisterDnsHandler};
pub use remote_exec::{RemoteExec, RemoteExecHandler};

use crate::domain::JobError;
use crate::ports::ProviderError;
use crate::typed::{HandlerRegistry, RegistryError};

/// Register every built-in handler.
pub fn register_all(registry: &mut HandlerRegistry) -> Result<(), RegistryError> {
    registry.register::<ProvisionHost, _>(ProvisionHostHandler)?;
    registry.register::<ConfigureHost, _>(ConfigureHostHandler)?;
    registry.register::<DeployStack, _>(DeployStackHandler)?;
    registry.register::<DeployApp, _>(DeployAppHandler)?;
    registry.register::<RemoteExec, _>(RemoteExecHandler)?;
    registry.register::<RegisterDns, _>(RegisterDnsHandler)?;
    Ok(())
}

fn provider_error(action: &str, err: ProviderError) -> JobError {
    JobError::execution(format!("{action}: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::JobKind;

    #[test]
    fn every_kind_has_a_builtin_handler() {
        let mut registry = HandlerRegistry::new();
        register_all(&mut registry).unwrap();
        assert_eq!(registry.registered_kinds(), JobKind::ALL.to_vec());
    }
}
