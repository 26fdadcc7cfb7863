//! Persisted system record and the storage seam behind it.
//!
//! The storage format is owned by the target. The core only needs
//! field-level `load`/`save`, which [`Store`] expresses. [`Context`] is the
//! explicitly owned record handed to the protocol engine and the console
//! dispatcher.

use core::fmt;

use heapless::String;

use crate::state::SamplingState;

/// Capacity of persisted text fields (serial number, firmware version).
pub const FIELD_TEXT_CAPACITY: usize = 16;

pub type FieldText = String<FIELD_TEXT_CAPACITY>;

/// Persisted fields.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Field {
    SamplingState,
    SerialNumber,
    FirmwareVersion,
    StartupCounter,
}

/// Typed value stored for a [`Field`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FieldValue {
    State(SamplingState),
    Text(FieldText),
    Counter(u32),
}

/// Errors raised by a [`Store`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StoreError {
    /// Backing storage could not be reached.
    Unavailable,
    /// The stored value does not fit the field.
    TypeMismatch(Field),
    /// The stored value could not be decoded.
    Corrupt(Field),
    /// Text exceeds [`FIELD_TEXT_CAPACITY`].
    TooLong(Field),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Unavailable => f.write_str("store unavailable"),
            StoreError::TypeMismatch(field) => write!(f, "type mismatch for {field:?}"),
            StoreError::Corrupt(field) => write!(f, "corrupt value for {field:?}"),
            StoreError::TooLong(field) => write!(f, "value too long for {field:?}"),
        }
    }
}

/// Field-level persistence capability.
pub trait Store {
    /// Loads a field. `Ok(None)` means the field was never written.
    ///
    /// # Errors
    ///
    /// Implementations report unreachable or undecodable storage.
    fn load(&mut self, field: Field) -> Result<Option<FieldValue>, StoreError>;

    /// Saves a field.
    ///
    /// # Errors
    ///
    /// Implementations report unreachable storage or mismatched values.
    fn save(&mut self, field: Field, value: &FieldValue) -> Result<(), StoreError>;
}

/// RAM-backed store. The state is kept as its numeric code, matching how
/// non-volatile targets persist it.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    state_code: Option<u32>,
    serial: Option<FieldText>,
    version: Option<FieldText>,
    startup_counter: Option<u32>,
}

impl MemoryStore {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state_code: None,
            serial: None,
            version: None,
            startup_counter: None,
        }
    }

    /// Pre-populates identity fields.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::TooLong`] when either value exceeds the field capacity.
    pub fn with_identity(mut self, serial: &str, version: &str) -> Result<Self, StoreError> {
        self.serial = Some(field_text(Field::SerialNumber, serial)?);
        self.version = Some(field_text(Field::FirmwareVersion, version)?);
        Ok(self)
    }

    /// Writes a raw state code directly, bypassing validation.
    pub fn set_raw_state(&mut self, code: u32) {
        self.state_code = Some(code);
    }

    /// Saved state code, unvalidated.
    #[must_use]
    pub fn raw_state(&self) -> Option<u32> {
        self.state_code
    }

    #[must_use]
    pub fn startup_counter(&self) -> Option<u32> {
        self.startup_counter
    }
}

impl Store for MemoryStore {
    fn load(&mut self, field: Field) -> Result<Option<FieldValue>, StoreError> {
        match field {
            Field::SamplingState => self
                .state_code
                .map(|code| {
                    SamplingState::from_raw(code)
                        .map(FieldValue::State)
                        .ok_or(StoreError::Corrupt(field))
                })
                .transpose(),
            Field::SerialNumber => Ok(self.serial.clone().map(FieldValue::Text)),
            Field::FirmwareVersion => Ok(self.version.clone().map(FieldValue::Text)),
            Field::StartupCounter => Ok(self.startup_counter.map(FieldValue::Counter)),
        }
    }

    fn save(&mut self, field: Field, value: &FieldValue) -> Result<(), StoreError> {
        match (field, value) {
            (Field::SamplingState, FieldValue::State(state)) => {
                self.state_code = Some(state.to_raw());
            }
            (Field::SerialNumber, FieldValue::Text(text)) => self.serial = Some(text.clone()),
            (Field::FirmwareVersion, FieldValue::Text(text)) => self.version = Some(text.clone()),
            (Field::StartupCounter, FieldValue::Counter(count)) => {
                self.startup_counter = Some(*count);
            }
            (field, _) => return Err(StoreError::TypeMismatch(field)),
        }
        Ok(())
    }
}

/// Identity and counters reported by the console.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SystemInfo {
    pub serial: FieldText,
    pub version: FieldText,
    pub startup_count: u32,
}

/// Owned system record: the authoritative sampling state plus identity.
pub struct Context<S> {
    store: S,
    state: SamplingState,
    info: SystemInfo,
}

impl<S> Context<S>
where
    S: Store,
{
    /// Loads every field, falling back to `Deploy` when no state was saved,
    /// then bumps and saves the startup counter.
    ///
    /// # Errors
    ///
    /// Propagates load and save failures from the store.
    pub fn boot(mut store: S) -> Result<Self, StoreError> {
        let state = match store.load(Field::SamplingState)? {
            Some(FieldValue::State(state)) => state,
            Some(_) => return Err(StoreError::TypeMismatch(Field::SamplingState)),
            None => SamplingState::DEFAULT,
        };
        let serial = load_text(&mut store, Field::SerialNumber)?;
        let version = load_text(&mut store, Field::FirmwareVersion)?;
        let previous = match store.load(Field::StartupCounter)? {
            Some(FieldValue::Counter(count)) => count,
            Some(_) => return Err(StoreError::TypeMismatch(Field::StartupCounter)),
            None => 0,
        };

        let startup_count = previous.wrapping_add(1);
        store.save(Field::StartupCounter, &FieldValue::Counter(startup_count))?;

        Ok(Self {
            store,
            state,
            info: SystemInfo {
                serial,
                version,
                startup_count,
            },
        })
    }

    #[must_use]
    pub fn state(&self) -> SamplingState {
        self.state
    }

    /// Updates the state in memory, then persists it.
    ///
    /// # Errors
    ///
    /// Returns the store error; the in-memory state has already changed.
    pub fn set_state(&mut self, state: SamplingState) -> Result<(), StoreError> {
        self.state = state;
        self.store.save(Field::SamplingState, &FieldValue::State(state))
    }

    #[must_use]
    pub fn info(&self) -> &SystemInfo {
        &self.info
    }

    /// # Errors
    ///
    /// Returns [`StoreError::TooLong`] or the store's save error.
    pub fn set_serial(&mut self, serial: &str) -> Result<(), StoreError> {
        let text = field_text(Field::SerialNumber, serial)?;
        self.store
            .save(Field::SerialNumber, &FieldValue::Text(text.clone()))?;
        self.info.serial = text;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`StoreError::TooLong`] or the store's save error.
    pub fn set_version(&mut self, version: &str) -> Result<(), StoreError> {
        let text = field_text(Field::FirmwareVersion, version)?;
        self.store
            .save(Field::FirmwareVersion, &FieldValue::Text(text.clone()))?;
        self.info.version = text;
        Ok(())
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }
}

fn load_text<S: Store>(store: &mut S, field: Field) -> Result<FieldText, StoreError> {
    match store.load(field)? {
        Some(FieldValue::Text(text)) => Ok(text),
        Some(_) => Err(StoreError::TypeMismatch(field)),
        None => Ok(FieldText::new()),
    }
}

fn field_text(field: Field, value: &str) -> Result<FieldText, StoreError> {
    let mut text = FieldText::new();
    text.push_str(value).map_err(|_| StoreError::TooLong(field))?;
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{GroupPhase, StateGroup};

    #[test]
    fn boot_defaults_to_deploy_and_counts_startups() {
        let store = MemoryStore::new()
            .with_identity("SERNUM01", "v1.7.32")
            .expect("identity fits");
        let context = Context::boot(store).expect("boot");

        assert_eq!(context.state(), SamplingState::Deploy);
        assert_eq!(context.info().serial.as_str(), "SERNUM01");
        assert_eq!(context.info().version.as_str(), "v1.7.32");
        assert_eq!(context.info().startup_count, 1);

        let again = Context::boot(context.into_store()).expect("second boot");
        assert_eq!(again.info().startup_count, 2);
        assert_eq!(again.store().startup_counter(), Some(2));
    }

    #[test]
    fn set_state_survives_reboot() {
        let mut context = Context::boot(MemoryStore::new()).expect("boot");
        let target = SamplingState::grouped(StateGroup::Span, GroupPhase::Vent);
        context.set_state(target).expect("save");

        let rebooted = Context::boot(context.into_store()).expect("reboot");
        assert_eq!(rebooted.state(), target);
    }

    #[test]
    fn corrupt_state_code_fails_boot() {
        let mut store = MemoryStore::new();
        store.set_raw_state(0xBEEF);
        assert!(matches!(
            Context::boot(store),
            Err(StoreError::Corrupt(Field::SamplingState))
        ));
    }

    #[test]
    fn mismatched_save_is_rejected() {
        let mut store = MemoryStore::new();
        assert_eq!(
            store.save(Field::StartupCounter, &FieldValue::State(SamplingState::Rest)),
            Err(StoreError::TypeMismatch(Field::StartupCounter))
        );
    }

    #[test]
    fn oversized_serial_is_rejected_without_mutation() {
        let mut context = Context::boot(MemoryStore::new()).expect("boot");
        assert_eq!(
            context.set_serial("THIS-SERIAL-IS-TOO-LONG"),
            Err(StoreError::TooLong(Field::SerialNumber))
        );
        assert!(context.info().serial.is_empty());

        context.set_serial("SEN170084").expect("fits");
        assert_eq!(context.info().serial.as_str(), "SEN170084");
    }
}
