//! NVS-backed config store for ESP-IDF targets.
//!
//! The whole address window lives in RAM and is persisted as one NVS blob.
//! Byte writes update the shadow and commit; block writes update the shadow
//! byte by byte and commit once at the end.
//!
//! NVS does its own wear leveling, so there is no "full" state here.

use esp_idf_svc::nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault};
use esp_idf_svc::sys::EspError;

use crate::config::{check_range, ConfigStore, InitOutcome, StoreError, EMPTY_VALUE};

/// NVS namespace for node configuration
pub const NVS_NAMESPACE: &str = "sensornet";

/// NVS key of the config blob
const BLOB_KEY: &str = "eeprom";

/// Size of the address window in bytes.
pub const NVS_CAPACITY: u16 = 2048;

impl From<EspError> for StoreError {
    fn from(e: EspError) -> Self {
        StoreError::Nvs(e.code())
    }
}

/// Config store on the default NVS partition.
pub struct NvsStore {
    partition: Option<EspDefaultNvsPartition>,
    storage: Option<EspNvs<NvsDefault>>,
    shadow: [u8; NVS_CAPACITY as usize],
}

impl NvsStore {
    pub fn new(partition: EspDefaultNvsPartition) -> Self {
        Self {
            partition: Some(partition),
            storage: None,
            shadow: [EMPTY_VALUE; NVS_CAPACITY as usize],
        }
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        let storage = self.storage.as_mut().ok_or(StoreError::NotInitialized)?;
        storage.set_blob(BLOB_KEY, &self.shadow)?;
        Ok(())
    }
}

impl ConfigStore for NvsStore {
    fn init(&mut self) -> Result<InitOutcome, StoreError> {
        if self.storage.is_none() {
            let partition = self.partition.take().ok_or(StoreError::NotInitialized)?;
            self.storage = Some(EspNvs::new(partition, NVS_NAMESPACE, true)?);
        }
        let storage = self.storage.as_mut().ok_or(StoreError::NotInitialized)?;

        let loaded = match storage.get_blob(BLOB_KEY, &mut self.shadow)? {
            Some(blob) => blob.len() == NVS_CAPACITY as usize,
            None => false,
        };
        if loaded {
            return Ok(InitOutcome::Ready);
        }

        // Missing or wrong-sized blob
        self.format()?;
        Ok(InitOutcome::Formatted)
    }

    fn capacity(&self) -> u16 {
        NVS_CAPACITY
    }

    fn read_byte(&mut self, address: u16) -> Result<u8, StoreError> {
        check_range(NVS_CAPACITY, address, 1)?;
        if self.storage.is_none() {
            return Err(StoreError::NotInitialized);
        }
        Ok(self.shadow[address as usize])
    }

    fn write_byte(&mut self, address: u16, value: u8) -> Result<(), StoreError> {
        check_range(NVS_CAPACITY, address, 1)?;
        if self.storage.is_none() {
            return Err(StoreError::NotInitialized);
        }
        if self.shadow[address as usize] == value {
            return Ok(());
        }
        self.shadow[address as usize] = value;
        self.commit()
    }

    fn write_block(&mut self, src: &[u8], address: u16) -> Result<(), StoreError> {
        check_range(NVS_CAPACITY, address, src.len())?;
        if self.storage.is_none() {
            return Err(StoreError::NotInitialized);
        }
        let mut dirty = false;
        for (offset, byte) in src.iter().enumerate() {
            let slot = &mut self.shadow[address as usize + offset];
            dirty |= *slot != *byte;
            *slot = *byte;
        }
        if dirty {
            self.commit()?;
        }
        Ok(())
    }

    fn format(&mut self) -> Result<(), StoreError> {
        self.shadow = [EMPTY_VALUE; NVS_CAPACITY as usize];
        self.commit()
    }
}
