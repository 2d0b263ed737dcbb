//! Owned snapshots of the complete internal state of an instance, and their portable byte form.
//!
//! Layout of a serialized snapshot (little endian):
//!
//! | field              | encoding                                   |
//! |--------------------|--------------------------------------------|
//! | magic              | `b"FMUS"`                                  |
//! | format version     | `u16`                                      |
//! | instantiation token| `u32` length + UTF-8                       |
//! | interface, mode    | `u8`, `u8`                                 |
//! | times              | time, start `f64`; stop, tolerance optional|
//! | dynamics           | event flags, indicators, input derivatives |
//! | store              | see [`crate::store::Store::serialize`]     |
//! | model state        | `u32` length + bytes                       |

use std::collections::BTreeMap;

use bytes::{Buf, BufMut, BytesMut};
use fmi::{fmi3::Fmi3Status, EventFlags, InterfaceType};

use crate::store::{Store, StoreError};

use super::{instance::Dynamics, Model, ModelState};

const MAGIC: &[u8; 4] = b"FMUS";
const FORMAT_VERSION: u16 = 1;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SnapshotError {
    #[error("Not a serialized unit state")]
    BadMagic,
    #[error("Unsupported snapshot format version {0}")]
    UnsupportedVersion(u16),
    #[error("Snapshot belongs to a different unit (token '{found}')")]
    TokenMismatch { found: String },
    #[error("Snapshot is truncated")]
    Truncated,
    #[error("{0} trailing bytes after the snapshot")]
    TrailingBytes(usize),
    #[error("Invalid {0} in snapshot")]
    InvalidTag(&'static str),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A strongly typed, owned copy of the complete internal state of a [`super::ModelInstance`].
///
/// Snapshots are independent of each other and of the instance they were taken from; restoring
/// one does not consume it.
#[derive(Clone)]
pub struct FmuState<M: Model> {
    pub(crate) interface_type: InterfaceType,
    pub(crate) state: ModelState,
    pub(crate) model: M,
    pub(crate) store: Store,
    pub(crate) time: f64,
    pub(crate) start_time: f64,
    pub(crate) stop_time: Option<f64>,
    pub(crate) tolerance: Option<f64>,
    pub(crate) dynamics: Dynamics,
}

impl<M: Model> std::fmt::Debug for FmuState<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FmuState")
            .field("model", &M::MODEL_NAME)
            .field("interface_type", &self.interface_type)
            .field("state", &self.state)
            .field("time", &self.time)
            .finish_non_exhaustive()
    }
}

impl<M: Model> FmuState<M> {
    pub fn interface_type(&self) -> InterfaceType {
        self.interface_type
    }

    /// The mode the instance re-enters when the snapshot is restored.
    pub fn state(&self) -> ModelState {
        self.state
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// The user model as it was when the snapshot was taken.
    pub fn model(&self) -> &M {
        &self.model
    }

    fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(128 + self.store.serialized_size());
        buf.put_slice(MAGIC);
        buf.put_u16_le(FORMAT_VERSION);
        put_bytes(&mut buf, M::INSTANTIATION_TOKEN.as_bytes());
        buf.put_u8(self.interface_type as u8);
        buf.put_u8(mode_tag(self.state));
        buf.put_f64_le(self.time);
        buf.put_f64_le(self.start_time);
        put_opt_f64(&mut buf, self.stop_time);
        put_opt_f64(&mut buf, self.tolerance);

        let d = &self.dynamics;
        let flags = &d.event_flags;
        for flag in [
            flags.discrete_states_need_update,
            flags.terminate_simulation,
            flags.nominals_of_continuous_states_changed,
            flags.values_of_continuous_states_changed,
            d.discrete_states_converged,
            d.event_mode_required,
            d.is_dirty_values,
            d.terminate_requested,
        ] {
            buf.put_u8(u8::from(flag));
        }
        put_opt_f64(&mut buf, flags.next_event_time);
        buf.put_f64_le(d.last_event_time);
        buf.put_f64_le(d.last_successful_time);
        buf.put_i32_le(d.last_step_status as i32);
        buf.put_u64_le(d.num_steps);
        put_f64s(&mut buf, &d.pre_event_indicators);
        buf.put_u32_le(d.input_derivatives.len() as u32);
        for (&(vr, order), values) in &d.input_derivatives {
            buf.put_u32_le(vr);
            buf.put_i32_le(order);
            put_f64s(&mut buf, values);
        }

        self.store.serialize(&mut buf);

        let mut tail = BytesMut::new();
        self.model.serialize_state(&mut tail);
        put_bytes(&mut buf, &tail);
        buf
    }

    /// Number of bytes written by [`FmuState::serialize`].
    pub fn serialized_size(&self) -> usize {
        self.encode().len()
    }

    /// Serialize into `buffer`, which must be exactly [`FmuState::serialized_size`] bytes long.
    pub fn serialize(&self, buffer: &mut [u8]) -> Result<(), SnapshotError> {
        let bytes = self.encode();
        if buffer.len() < bytes.len() {
            return Err(SnapshotError::Truncated);
        }
        if buffer.len() > bytes.len() {
            return Err(SnapshotError::TrailingBytes(buffer.len() - bytes.len()));
        }
        buffer.copy_from_slice(&bytes);
        Ok(())
    }

    /// Rebuild a snapshot of the unit `M`. `layout` is a store of the unit, whose descriptors
    /// the serialized values are checked against.
    pub fn deserialize(mut bytes: &[u8], layout: &Store) -> Result<Self, SnapshotError> {
        let buf = &mut bytes;

        let magic = take(buf, MAGIC.len())?;
        if magic != MAGIC {
            return Err(SnapshotError::BadMagic);
        }
        ensure(buf, 2)?;
        let version = buf.get_u16_le();
        if version != FORMAT_VERSION {
            return Err(SnapshotError::UnsupportedVersion(version));
        }
        let token = take_bytes(buf)?;
        if token != M::INSTANTIATION_TOKEN.as_bytes() {
            return Err(SnapshotError::TokenMismatch {
                found: String::from_utf8_lossy(token).into_owned(),
            });
        }

        ensure(buf, 2 + 16)?;
        let interface_type = InterfaceType::try_from(i32::from(buf.get_u8()))
            .map_err(|_| SnapshotError::InvalidTag("interface type"))?;
        let state = mode_from_tag(buf.get_u8())?;
        let time = buf.get_f64_le();
        let start_time = buf.get_f64_le();
        let stop_time = take_opt_f64(buf)?;
        let tolerance = take_opt_f64(buf)?;

        let mut flags = [false; 8];
        for flag in &mut flags {
            *flag = take_bool(buf)?;
        }
        let next_event_time = take_opt_f64(buf)?;
        ensure(buf, 8 + 8 + 4 + 8)?;
        let last_event_time = buf.get_f64_le();
        let last_successful_time = buf.get_f64_le();
        let last_step_status = Fmi3Status::try_from(buf.get_i32_le())
            .map_err(|_| SnapshotError::InvalidTag("step status"))?;
        let num_steps = buf.get_u64_le();
        let pre_event_indicators = take_f64s(buf)?;
        if pre_event_indicators.len() != M::NUM_EVENT_INDICATORS {
            return Err(SnapshotError::InvalidTag("number of event indicators"));
        }

        ensure(buf, 4)?;
        let count = buf.get_u32_le();
        let mut input_derivatives = BTreeMap::new();
        for _ in 0..count {
            ensure(buf, 8)?;
            let vr = buf.get_u32_le();
            let order = buf.get_i32_le();
            input_derivatives.insert((vr, order), take_f64s(buf)?);
        }

        let dynamics = Dynamics {
            event_flags: EventFlags {
                discrete_states_need_update: flags[0],
                terminate_simulation: flags[1],
                nominals_of_continuous_states_changed: flags[2],
                values_of_continuous_states_changed: flags[3],
                next_event_time,
            },
            discrete_states_converged: flags[4],
            event_mode_required: flags[5],
            last_event_time,
            pre_event_indicators,
            is_dirty_values: flags[6],
            last_successful_time,
            input_derivatives,
            last_step_status,
            terminate_requested: flags[7],
            num_steps,
        };

        let mut store = layout.clone();
        store.deserialize(buf)?;

        let mut tail = take_bytes(buf)?;
        let mut model = M::default();
        model.deserialize_state(&mut tail)?;
        if !tail.is_empty() {
            return Err(SnapshotError::TrailingBytes(tail.len()));
        }
        if !buf.is_empty() {
            return Err(SnapshotError::TrailingBytes(buf.len()));
        }

        Ok(Self {
            interface_type,
            state,
            model,
            store,
            time,
            start_time,
            stop_time,
            tolerance,
            dynamics,
        })
    }
}

fn mode_tag(state: ModelState) -> u8 {
    match state {
        ModelState::Instantiated => 0,
        ModelState::InitializationMode => 1,
        ModelState::EventMode => 2,
        ModelState::ContinuousTimeMode => 3,
        ModelState::StepMode => 4,
        ModelState::StepInProgress => 5,
        ModelState::StepCanceled => 6,
        ModelState::Terminated => 7,
        ModelState::Error => 8,
        ModelState::Fatal => 9,
    }
}

/// Only the modes a snapshot can be taken in are accepted.
fn mode_from_tag(tag: u8) -> Result<ModelState, SnapshotError> {
    match tag {
        1 => Ok(ModelState::InitializationMode),
        2 => Ok(ModelState::EventMode),
        3 => Ok(ModelState::ContinuousTimeMode),
        4 => Ok(ModelState::StepMode),
        7 => Ok(ModelState::Terminated),
        _ => Err(SnapshotError::InvalidTag("mode")),
    }
}

fn put_bytes(buf: &mut BytesMut, bytes: &[u8]) {
    buf.put_u32_le(bytes.len() as u32);
    buf.put_slice(bytes);
}

fn put_opt_f64(buf: &mut BytesMut, value: Option<f64>) {
    match value {
        Some(value) => {
            buf.put_u8(1);
            buf.put_f64_le(value);
        }
        None => buf.put_u8(0),
    }
}

fn put_f64s(buf: &mut BytesMut, values: &[f64]) {
    buf.put_u32_le(values.len() as u32);
    for &value in values {
        buf.put_f64_le(value);
    }
}

fn ensure(buf: &&[u8], n: usize) -> Result<(), SnapshotError> {
    if buf.remaining() < n {
        Err(SnapshotError::Truncated)
    } else {
        Ok(())
    }
}

fn take<'a>(buf: &mut &'a [u8], n: usize) -> Result<&'a [u8], SnapshotError> {
    ensure(buf, n)?;
    let slice: &'a [u8] = *buf;
    let (head, rest) = slice.split_at(n);
    *buf = rest;
    Ok(head)
}

fn take_bytes<'a>(buf: &mut &'a [u8]) -> Result<&'a [u8], SnapshotError> {
    ensure(buf, 4)?;
    let n = buf.get_u32_le() as usize;
    take(buf, n)
}

fn take_bool(buf: &mut &[u8]) -> Result<bool, SnapshotError> {
    ensure(buf, 1)?;
    match buf.get_u8() {
        0 => Ok(false),
        1 => Ok(true),
        _ => Err(SnapshotError::InvalidTag("boolean")),
    }
}

fn take_opt_f64(buf: &mut &[u8]) -> Result<Option<f64>, SnapshotError> {
    if take_bool(buf)? {
        ensure(buf, 8)?;
        Ok(Some(buf.get_f64_le()))
    } else {
        Ok(None)
    }
}

fn take_f64s(buf: &mut &[u8]) -> Result<Vec<f64>, SnapshotError> {
    ensure(buf, 4)?;
    let n = buf.get_u32_le() as usize;
    ensure(buf, n * 8)?;
    Ok((0..n).map(|_| buf.get_f64_le()).collect())
}
