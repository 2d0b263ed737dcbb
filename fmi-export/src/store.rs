//! A typed variable store for FMI 3.0 units.
//!
//! Goals:
//! - SoA layout per FMI variable type (and arrays thereof)
//! - ValueReference mapping to typed pools via descriptors shared between copies of a store
//! - Batch get/set helpers matching FMI access patterns (flat buffers, arrays consume several slots)
//! - Serialize/deserialize of the pools for snapshot save/restore

use std::{collections::BTreeMap, fmt::Display, mem, sync::Arc};

use bytes::{Buf, BufMut};
use fmi::fmi3::ValueReference;

/// FMI variable types supported by the store.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VariableType {
    Float32,
    Float64,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Boolean,
    String,
    Binary,
}

impl VariableType {
    pub fn is_numeric(self) -> bool {
        !matches!(self, Self::Boolean | Self::String | Self::Binary)
    }
}

impl Display for VariableType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// Typed descriptor for table entries, making offset/len explicit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Desc {
    pub ty: VariableType,
    pub offset: usize,
    pub len: usize,
}

/// Error type for store operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("The ValueReference {0} was not found in the descriptor table.")]
    UnknownValueReference(ValueReference),
    #[error("The ValueReference {0} is already in use.")]
    DuplicateValueReference(ValueReference),
    #[error("Variable {vr} is of type {actual}, but was accessed as {expected}.")]
    TypeMismatch {
        vr: ValueReference,
        expected: VariableType,
        actual: VariableType,
    },
    #[error("Buffer holds {actual} values, but the variables have {expected} elements.")]
    BufferSizeMismatch { expected: usize, actual: usize },
    #[error("The destination buffer is too small.")]
    BufferTooSmall,
    #[error("Element {index} is out of bounds for variable {vr}.")]
    OutOfBounds { vr: ValueReference, index: usize },
    #[error("Serialized payload corrupted: {0}")]
    BadSerialization(&'static str),
}

/// The typed value pools (SoA) of a store.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Pools {
    f32s: Vec<f32>,
    f64s: Vec<f64>,
    i8s: Vec<i8>,
    i16s: Vec<i16>,
    i32s: Vec<i32>,
    i64s: Vec<i64>,
    u8s: Vec<u8>,
    u16s: Vec<u16>,
    u32s: Vec<u32>,
    u64s: Vec<u64>,
    bools: Vec<bool>,
    strings: Vec<String>,
    binaries: Vec<Vec<u8>>,
}

/// A Rust type that is stored in one of the pools.
pub trait StoreValue: Clone + Sized + 'static {
    const TYPE: VariableType;
    fn pool(pools: &Pools) -> &Vec<Self>;
    fn pool_mut(pools: &mut Pools) -> &mut Vec<Self>;
}

macro_rules! impl_store_value {
    ($($ty:ty => $variant:ident, $field:ident;)*) => {
        $(
            impl StoreValue for $ty {
                const TYPE: VariableType = VariableType::$variant;
                #[inline]
                fn pool(pools: &Pools) -> &Vec<Self> {
                    &pools.$field
                }
                #[inline]
                fn pool_mut(pools: &mut Pools) -> &mut Vec<Self> {
                    &mut pools.$field
                }
            }
        )*
    };
}

impl_store_value! {
    f32 => Float32, f32s;
    f64 => Float64, f64s;
    i8 => Int8, i8s;
    i16 => Int16, i16s;
    i32 => Int32, i32s;
    i64 => Int64, i64s;
    u8 => UInt8, u8s;
    u16 => UInt16, u16s;
    u32 => UInt32, u32s;
    u64 => UInt64, u64s;
    bool => Boolean, bools;
    String => String, strings;
    Vec<u8> => Binary, binaries;
}

/// Collects variables and their start values into a [`Store`].
#[derive(Debug, Default)]
pub struct StoreBuilder {
    descs: BTreeMap<ValueReference, Desc>,
    pools: Pools,
}

impl StoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a variable with the given start values. The number of values is the element count.
    pub fn push<T: StoreValue>(&mut self, vr: ValueReference, start: Vec<T>) -> Result<(), StoreError> {
        if self.descs.contains_key(&vr) {
            return Err(StoreError::DuplicateValueReference(vr));
        }
        let pool = T::pool_mut(&mut self.pools);
        let desc = Desc {
            ty: T::TYPE,
            offset: pool.len(),
            len: start.len(),
        };
        pool.extend(start);
        self.descs.insert(vr, desc);
        Ok(())
    }

    pub fn build(self) -> Store {
        Store {
            descs: Arc::new(self.descs),
            pools: self.pools,
        }
    }
}

/// Runtime store across FMI variable types.
///
/// All variables of a type are packed into the corresponding pool and addressed via the
/// descriptor table. Cloning a store copies the values and shares the table.
#[derive(Clone, Debug)]
pub struct Store {
    descs: Arc<BTreeMap<ValueReference, Desc>>,
    pools: Pools,
}

impl PartialEq for Store {
    fn eq(&self, other: &Self) -> bool {
        (Arc::ptr_eq(&self.descs, &other.descs) || self.descs == other.descs)
            && self.pools == other.pools
    }
}

impl Store {
    /// Decode a VR into (type, offset, len).
    #[inline]
    pub fn desc(&self, vr: ValueReference) -> Result<Desc, StoreError> {
        self.descs
            .get(&vr)
            .copied()
            .ok_or(StoreError::UnknownValueReference(vr))
    }

    pub fn contains(&self, vr: ValueReference) -> bool {
        self.descs.contains_key(&vr)
    }

    pub fn value_references(&self) -> impl Iterator<Item = ValueReference> + '_ {
        self.descs.keys().copied()
    }

    /// Total number of elements of `vrs`, irrespective of type.
    pub fn element_count(&self, vrs: &[ValueReference]) -> Result<usize, StoreError> {
        vrs.iter().try_fold(0, |acc, &vr| Ok(acc + self.desc(vr)?.len))
    }

    fn typed_desc<T: StoreValue>(&self, vr: ValueReference) -> Result<Desc, StoreError> {
        let desc = self.desc(vr)?;
        if desc.ty != T::TYPE {
            return Err(StoreError::TypeMismatch {
                vr,
                expected: T::TYPE,
                actual: desc.ty,
            });
        }
        Ok(desc)
    }

    pub fn slice<T: StoreValue>(&self, vr: ValueReference) -> Result<&[T], StoreError> {
        let desc = self.typed_desc::<T>(vr)?;
        Ok(&T::pool(&self.pools)[desc.offset..desc.offset + desc.len])
    }

    pub fn slice_mut<T: StoreValue>(&mut self, vr: ValueReference) -> Result<&mut [T], StoreError> {
        let desc = self.typed_desc::<T>(vr)?;
        Ok(&mut T::pool_mut(&mut self.pools)[desc.offset..desc.offset + desc.len])
    }

    /// Get the first element of a variable.
    pub fn get<T: StoreValue>(&self, vr: ValueReference) -> Result<T, StoreError> {
        self.slice::<T>(vr)?
            .first()
            .cloned()
            .ok_or(StoreError::OutOfBounds { vr, index: 0 })
    }

    /// Set the first element of a variable.
    pub fn set<T: StoreValue>(&mut self, vr: ValueReference, value: T) -> Result<(), StoreError> {
        let slot = self
            .slice_mut::<T>(vr)?
            .first_mut()
            .ok_or(StoreError::OutOfBounds { vr, index: 0 })?;
        *slot = value;
        Ok(())
    }

    /// Validate that all `vrs` are of type `T` and that their element count equals `len`.
    fn check_batch<T: StoreValue>(&self, vrs: &[ValueReference], len: usize) -> Result<(), StoreError> {
        let mut expected = 0;
        for &vr in vrs {
            expected += self.typed_desc::<T>(vr)?.len;
        }
        if expected != len {
            return Err(StoreError::BufferSizeMismatch {
                expected,
                actual: len,
            });
        }
        Ok(())
    }

    /// Read all elements of `vrs` in order into the flat buffer `out`.
    pub fn get_batch<T: StoreValue>(&self, vrs: &[ValueReference], out: &mut [T]) -> Result<(), StoreError> {
        self.check_batch::<T>(vrs, out.len())?;
        let mut cursor = 0;
        for &vr in vrs {
            let src = self.slice::<T>(vr)?;
            out[cursor..cursor + src.len()].clone_from_slice(src);
            cursor += src.len();
        }
        Ok(())
    }

    /// Write the flat buffer `values` in order into all elements of `vrs`. Nothing is written if
    /// the batch is invalid.
    pub fn set_batch<T: StoreValue>(&mut self, vrs: &[ValueReference], values: &[T]) -> Result<(), StoreError> {
        self.check_batch::<T>(vrs, values.len())?;
        let mut cursor = 0;
        for &vr in vrs {
            let dst = self.slice_mut::<T>(vr)?;
            let n = dst.len();
            dst.clone_from_slice(&values[cursor..cursor + n]);
            cursor += n;
        }
        Ok(())
    }

    /// Number of bytes written by [`Store::serialize`].
    pub fn serialized_size(&self) -> usize {
        let p = &self.pools;
        let numeric = [
            p.f32s.len() * mem::size_of::<f32>(),
            p.f64s.len() * mem::size_of::<f64>(),
            p.i8s.len(),
            p.i16s.len() * mem::size_of::<i16>(),
            p.i32s.len() * mem::size_of::<i32>(),
            p.i64s.len() * mem::size_of::<i64>(),
            p.u8s.len(),
            p.u16s.len() * mem::size_of::<u16>(),
            p.u32s.len() * mem::size_of::<u32>(),
            p.u64s.len() * mem::size_of::<u64>(),
            p.bools.len(),
        ];
        let strings: usize = p.strings.iter().map(|s| 4 + s.len()).sum();
        let binaries: usize = p.binaries.iter().map(|b| 4 + b.len()).sum();
        // one u32 length prefix per pool
        13 * 4 + numeric.iter().sum::<usize>() + strings + binaries
    }

    pub fn serialize<B: BufMut>(&self, buf: &mut B) {
        let p = &self.pools;
        macro_rules! put_pool {
            ($field:ident, $put:ident) => {
                buf.put_u32_le(p.$field.len() as u32);
                for v in &p.$field {
                    buf.$put(*v);
                }
            };
        }
        put_pool!(f32s, put_f32_le);
        put_pool!(f64s, put_f64_le);
        put_pool!(i8s, put_i8);
        put_pool!(i16s, put_i16_le);
        put_pool!(i32s, put_i32_le);
        put_pool!(i64s, put_i64_le);
        put_pool!(u8s, put_u8);
        put_pool!(u16s, put_u16_le);
        put_pool!(u32s, put_u32_le);
        put_pool!(u64s, put_u64_le);

        buf.put_u32_le(p.bools.len() as u32);
        for v in &p.bools {
            buf.put_u8(u8::from(*v));
        }
        buf.put_u32_le(p.strings.len() as u32);
        for s in &p.strings {
            buf.put_u32_le(s.len() as u32);
            buf.put_slice(s.as_bytes());
        }
        buf.put_u32_le(p.binaries.len() as u32);
        for b in &p.binaries {
            buf.put_u32_le(b.len() as u32);
            buf.put_slice(b);
        }
    }

    /// Replace the pool contents with serialized values. The layout must match this store; on
    /// error the store is left untouched.
    pub fn deserialize<B: Buf>(&mut self, buf: &mut B) -> Result<(), StoreError> {
        let current = &self.pools;
        let mut pools = Pools::default();

        macro_rules! get_pool {
            ($field:ident, $get:ident, $size:expr) => {
                let n = take_len(buf, current.$field.len())?;
                ensure(buf, n * $size)?;
                pools.$field = (0..n).map(|_| buf.$get()).collect();
            };
        }
        get_pool!(f32s, get_f32_le, 4);
        get_pool!(f64s, get_f64_le, 8);
        get_pool!(i8s, get_i8, 1);
        get_pool!(i16s, get_i16_le, 2);
        get_pool!(i32s, get_i32_le, 4);
        get_pool!(i64s, get_i64_le, 8);
        get_pool!(u8s, get_u8, 1);
        get_pool!(u16s, get_u16_le, 2);
        get_pool!(u32s, get_u32_le, 4);
        get_pool!(u64s, get_u64_le, 8);

        let n = take_len(buf, current.bools.len())?;
        ensure(buf, n)?;
        pools.bools = (0..n)
            .map(|_| match buf.get_u8() {
                0 => Ok(false),
                1 => Ok(true),
                _ => Err(StoreError::BadSerialization("invalid boolean")),
            })
            .collect::<Result<_, _>>()?;

        let n = take_len(buf, current.strings.len())?;
        pools.strings = (0..n)
            .map(|_| {
                let bytes = take_bytes(buf)?;
                String::from_utf8(bytes).map_err(|_| StoreError::BadSerialization("invalid utf-8"))
            })
            .collect::<Result<_, _>>()?;

        let n = take_len(buf, current.binaries.len())?;
        pools.binaries = (0..n).map(|_| take_bytes(buf)).collect::<Result<_, _>>()?;

        self.pools = pools;
        Ok(())
    }
}

fn ensure<B: Buf>(buf: &B, n: usize) -> Result<(), StoreError> {
    if buf.remaining() < n {
        Err(StoreError::BadSerialization("truncated payload"))
    } else {
        Ok(())
    }
}

/// Read a pool length prefix and check it against the layout.
fn take_len<B: Buf>(buf: &mut B, expected: usize) -> Result<usize, StoreError> {
    ensure(buf, 4)?;
    let n = buf.get_u32_le() as usize;
    if n != expected {
        return Err(StoreError::BadSerialization("pool size does not match the layout"));
    }
    Ok(n)
}

fn take_bytes<B: Buf>(buf: &mut B) -> Result<Vec<u8>, StoreError> {
    ensure(buf, 4)?;
    let n = buf.get_u32_le() as usize;
    ensure(buf, n)?;
    let mut bytes = vec![0; n];
    buf.copy_to_slice(&mut bytes);
    Ok(bytes)
}
