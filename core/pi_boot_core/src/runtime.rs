//! Runtime services: variable access and system reset.
//!
//! After `ExitBootServices` only variables carrying `RUNTIME_ACCESS` stay visible.
//!
//! ## License
//!
//! Copyright (C) Microsoft Corporation.
//!
//! SPDX-License-Identifier: BSD-2-Clause-Patent
//!
use alloc::{boxed::Box, string::String, sync::Arc, vec::Vec};
use core::fmt;

use pi_sdk::{
    error::EfiError,
    guid_fmt,
    pi::variable::attributes::RUNTIME_ACCESS,
    runtime::{NullVariableStorage, VariableStorage},
};
use r_efi::efi;

use crate::capabilities::{NullReset, PlatformReset, ResetType};

pub struct RuntimeServices {
    variables: Box<dyn VariableStorage>,
    reset: Arc<dyn PlatformReset>,
    at_runtime: bool,
}

impl Default for RuntimeServices {
    fn default() -> Self {
        Self::new(Box::new(NullVariableStorage), Arc::new(NullReset))
    }
}

impl RuntimeServices {
    pub fn new(variables: Box<dyn VariableStorage>, reset: Arc<dyn PlatformReset>) -> Self {
        Self { variables, reset, at_runtime: false }
    }

    pub(crate) fn set_variable_storage(&mut self, variables: Box<dyn VariableStorage>) {
        self.variables = variables;
    }

    pub(crate) fn set_platform_reset(&mut self, reset: Arc<dyn PlatformReset>) {
        self.reset = reset;
    }

    pub(crate) fn enter_runtime(&mut self) {
        self.at_runtime = true;
    }

    pub fn get_variable(&self, name: &str, vendor: &efi::Guid) -> Result<(u32, Vec<u8>), EfiError> {
        let (attributes, data) = self.variables.get_variable(name, vendor)?;
        if self.at_runtime && attributes & RUNTIME_ACCESS == 0 {
            return Err(EfiError::NotFound);
        }
        Ok((attributes, data))
    }

    /// Create, replace, or (with empty `data`) delete a variable.
    pub fn set_variable(
        &mut self,
        name: &str,
        vendor: &efi::Guid,
        attributes: u32,
        data: &[u8],
    ) -> Result<(), EfiError> {
        if self.at_runtime && !data.is_empty() && attributes & RUNTIME_ACCESS == 0 {
            log::warn!(
                target: "pi_runtime",
                "runtime write of boot-services-only variable {name} ({})",
                guid_fmt!(vendor)
            );
            return Err(EfiError::InvalidParameter);
        }
        self.variables.set_variable(name, vendor, attributes, data)
    }

    pub fn variable_names(&self) -> Result<Vec<(String, efi::Guid)>, EfiError> {
        let names = self.variables.variable_names()?;
        if !self.at_runtime {
            return Ok(names);
        }
        Ok(names.into_iter().filter(|(name, vendor)| self.get_variable(name, vendor).is_ok()).collect())
    }

    pub fn reset_system(&self, reset_type: ResetType, status: efi::Status) {
        self.reset.reset_system(reset_type, status);
    }
}

impl fmt::Debug for RuntimeServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeServices").field("at_runtime", &self.at_runtime).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::MockPlatformReset;
    use pi_sdk::{pi::variable::attributes::BOOTSERVICE_ACCESS, runtime::MockVariableStorage};
    use std::{string::ToString, vec};

    const VENDOR: efi::Guid = efi::Guid::from_bytes(&[0x42; 16]);

    fn storage() -> MockVariableStorage {
        let mut storage = MockVariableStorage::new();
        storage.expect_get_variable().returning(|name, _| match name {
            "Lang" => Ok((BOOTSERVICE_ACCESS | RUNTIME_ACCESS, b"en".to_vec())),
            "Setup" => Ok((BOOTSERVICE_ACCESS, vec![1])),
            _ => Err(EfiError::NotFound),
        });
        storage
            .expect_variable_names()
            .returning(|| Ok(vec![("Lang".to_string(), VENDOR), ("Setup".to_string(), VENDOR)]));
        storage
    }

    #[test]
    fn boot_services_variables_vanish_at_runtime() {
        let mut services = RuntimeServices::new(Box::new(storage()), Arc::new(NullReset));
        assert_eq!(services.get_variable("Setup", &VENDOR), Ok((BOOTSERVICE_ACCESS, vec![1])));
        assert_eq!(services.variable_names().unwrap().len(), 2);

        services.enter_runtime();
        assert_eq!(services.get_variable("Setup", &VENDOR), Err(EfiError::NotFound));
        assert_eq!(services.get_variable("Lang", &VENDOR).unwrap().1, b"en".to_vec());
        assert_eq!(services.variable_names().unwrap(), vec![("Lang".to_string(), VENDOR)]);
    }

    #[test]
    fn runtime_writes_need_runtime_access() {
        let mut storage = storage();
        storage.expect_set_variable().times(1).returning(|_, _, _, _| Ok(()));
        let mut services = RuntimeServices::new(Box::new(storage), Arc::new(NullReset));
        services.enter_runtime();
        assert_eq!(services.set_variable("Setup", &VENDOR, BOOTSERVICE_ACCESS, &[2]), Err(EfiError::InvalidParameter));
        assert_eq!(services.set_variable("Lang", &VENDOR, BOOTSERVICE_ACCESS | RUNTIME_ACCESS, b"fr"), Ok(()));
    }

    #[test]
    fn reset_goes_to_the_platform() {
        let mut reset = MockPlatformReset::new();
        reset
            .expect_reset_system()
            .withf(|reset_type, status| *reset_type == ResetType::Warm && *status == efi::Status::SUCCESS)
            .times(1)
            .return_const(());
        let services = RuntimeServices::new(Box::new(NullVariableStorage), Arc::new(reset));
        services.reset_system(ResetType::Warm, efi::Status::SUCCESS);
    }
}
