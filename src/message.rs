//! Immutable, reference-counted messages shipped through [`crate::port`] and
//! handed to [`crate::receiver::Receiver`] handlers.
//!
//! A [`Message`] is assembled through [`MessageBuilder`] and frozen into an
//! `Arc<MessageInner>` by [`MessageBuilder::build`]; there is no mutable path
//! back into a built message once it is built. Cloning and dropping the
//! `Arc` is the whole reference-counting story.
//!
//! Scalar accessors (`set_i32`/`get_i32`, etc.) are generated by the
//! [`scalar_accessors`] macro using `paste` for identifier concatenation,
//! trading one macro definition for the twelve repetitive accessor pairs it
//! would otherwise take to write by hand.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::MessageError;

/// A type-erased pointer bundled with an optional destructor, run at most
/// once when the last [`Value`] holding it is dropped.
///
/// Wrapping `(ptr, destructor)` in an `Arc` gives the "run once on last
/// release" semantics for free: cloning a [`Value::Pointer`] (e.g. via
/// [`Message::copy`]) bumps the same `Arc`, so the destructor only fires
/// when every message referencing it has gone away.
pub struct DestructiblePointer(Arc<PointerInner>);

struct PointerInner {
    ptr: *mut (),
    destroy: Option<Box<dyn Fn(*mut ()) + Send + Sync>>,
}

// SAFETY: the pointer is never dereferenced by this crate; it is opaque
// payload handed back to the caller's own destructor, which is itself
// required to be `Send + Sync`.
unsafe impl Send for PointerInner {}
unsafe impl Sync for PointerInner {}

impl Drop for PointerInner {
    fn drop(&mut self) {
        if let Some(destroy) = self.destroy.take() {
            destroy(self.ptr);
        }
    }
}

impl DestructiblePointer {
    pub fn new(ptr: *mut (), destroy: impl Fn(*mut ()) + Send + Sync + 'static) -> Self {
        DestructiblePointer(Arc::new(PointerInner {
            ptr,
            destroy: Some(Box::new(destroy)),
        }))
    }

    /// A pointer value with no destructor: dropping it is a no-op.
    pub fn without_destructor(ptr: *mut ()) -> Self {
        DestructiblePointer(Arc::new(PointerInner { ptr, destroy: None }))
    }

    pub fn as_ptr(&self) -> *mut () {
        self.0.ptr
    }
}

impl Clone for DestructiblePointer {
    fn clone(&self) -> Self {
        DestructiblePointer(self.0.clone())
    }
}

impl PartialEq for DestructiblePointer {
    fn eq(&self, other: &Self) -> bool {
        self.0.ptr == other.0.ptr
    }
}

impl std::fmt::Debug for DestructiblePointer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DestructiblePointer({:p})", self.0.ptr)
    }
}

/// A single tagged scalar value, as stored in a message's attribute map or
/// its unkeyed "data" slot.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    Bool(bool),
    Str(String),
    Pointer(DestructiblePointer),
}

impl Value {
    /// The numeric type tag used by [`Message::flattened_size`].
    fn type_tag(&self) -> u16 {
        match self {
            Value::I8(_) => 0,
            Value::I16(_) => 1,
            Value::I32(_) => 2,
            Value::I64(_) => 3,
            Value::U8(_) => 4,
            Value::U16(_) => 5,
            Value::U32(_) => 6,
            Value::U64(_) => 7,
            Value::F32(_) => 8,
            Value::F64(_) => 9,
            Value::Bool(_) => 10,
            Value::Str(_) => 11,
            Value::Pointer(_) => 12,
        }
    }

    /// Raw payload length in bytes, as flattened on the wire. Strings count
    /// their NUL terminator; pointers count the width of a raw pointer.
    fn flattened_payload_len(&self) -> usize {
        match self {
            Value::I8(_) | Value::U8(_) | Value::Bool(_) => 1,
            Value::I16(_) | Value::U16(_) => 2,
            Value::I32(_) | Value::U32(_) | Value::F32(_) => 4,
            Value::I64(_) | Value::U64(_) | Value::F64(_) => 8,
            Value::Str(s) => s.len() + 1,
            Value::Pointer(_) => std::mem::size_of::<*mut ()>(),
        }
    }
}

struct MessageInner {
    what: i32,
    attrs: HashMap<String, Value>,
    data: Option<Value>,
}

/// An immutable, reference-counted message.
///
/// `Clone` is the source's `ref`; letting the last clone drop is the
/// source's `unref`, which is also the point at which any
/// [`DestructiblePointer`] destructors still reachable only from this
/// message actually run.
#[derive(Clone)]
pub struct Message(Arc<MessageInner>);

impl Message {
    /// Starts building a message with no attributes and no data.
    pub fn new(what: i32) -> MessageBuilder {
        MessageBuilder {
            what,
            attrs: HashMap::new(),
            data: None,
        }
    }

    /// Builds a message directly from a pre-populated attribute set (the
    /// source's `message_new_full`).
    pub fn new_full(what: i32, attrs: impl IntoIterator<Item = (String, Value)>) -> Message {
        MessageBuilder {
            what,
            attrs: attrs.into_iter().collect(),
            data: None,
        }
        .build()
    }

    pub fn what(&self) -> i32 {
        self.0.what
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.attrs.contains_key(name)
    }

    pub fn count_names(&self) -> usize {
        self.0.attrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.attrs.is_empty() && self.0.data.is_none()
    }

    pub fn data(&self) -> Option<&Value> {
        self.0.data.as_ref()
    }

    /// The current reference count (the source's notion of how many `ref`s
    /// are outstanding, including this one).
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    /// Produces an independent message equal under every `get_*` accessor
    /// to `self`, with its own refcount. `Value::Pointer` payloads are
    /// shared (their destructor still only runs once, on the last release
    /// across both messages).
    pub fn copy(&self) -> Message {
        Message(Arc::new(MessageInner {
            what: self.0.what,
            attrs: self.0.attrs.clone(),
            data: self.0.data.clone(),
        }))
    }

    /// The flattened wire size: 4 bytes for `what`, plus per attribute
    /// 4 (name length) + name bytes + 2 (type tag) + 4 (value size) + value
    /// bytes.
    pub fn flattened_size(&self) -> usize {
        let mut size = 4;
        for (name, value) in &self.0.attrs {
            size += 4 + name.as_bytes().len() + 2 + 4 + value.flattened_payload_len();
        }
        size
    }
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Message")
            .field("what", &self.0.what)
            .field("names", &self.0.attrs.len())
            .finish()
    }
}

/// Mutable assembly stage for a [`Message`]. Consumed by
/// [`MessageBuilder::build`], after which the result is frozen.
pub struct MessageBuilder {
    what: i32,
    attrs: HashMap<String, Value>,
    data: Option<Value>,
}

impl MessageBuilder {
    pub fn set_data(mut self, value: Value) -> Self {
        self.data = Some(value);
        self
    }

    pub fn build(self) -> Message {
        crate::debug::trace_section!(
            crate::debug::section::MESSAGE,
            "junction::message",
            "building message what={} names={}",
            self.what,
            self.attrs.len()
        );
        Message(Arc::new(MessageInner {
            what: self.what,
            attrs: self.attrs,
            data: self.data,
        }))
    }
}

macro_rules! scalar_accessors {
    ($($variant:ident($ty:ty) => $name:ident),+ $(,)?) => {
        paste::paste! {
            impl MessageBuilder {
                $(
                    #[doc = "Sets a `" $name "`-typed attribute, overwriting any existing value under the same name."]
                    pub fn [<set_ $name>](mut self, name: impl Into<String>, value: $ty) -> Self {
                        self.attrs.insert(name.into(), Value::$variant(value));
                        self
                    }
                )+
            }

            impl Message {
                $(
                    #[doc = "Reads a `" $name "`-typed attribute by name."]
                    pub fn [<get_ $name>](&self, name: &str) -> Result<$ty, MessageError> {
                        match self.0.attrs.get(name) {
                            Some(Value::$variant(v)) => Ok(v.clone()),
                            Some(_) => Err(MessageError::TypeMismatch { name: name.to_string() }),
                            None => Err(MessageError::NoSuchName { name: name.to_string() }),
                        }
                    }
                )+
            }
        }
    };
}

scalar_accessors! {
    I8(i8) => i8,
    I16(i16) => i16,
    I32(i32) => i32,
    I64(i64) => i64,
    U8(u8) => u8,
    U16(u16) => u16,
    U32(u32) => u32,
    U64(u64) => u64,
    F32(f32) => f32,
    F64(f64) => f64,
    Bool(bool) => bool,
    Str(String) => string,
    Pointer(DestructiblePointer) => pointer,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn new_message_has_refcount_one_and_no_attrs() {
        let m = Message::new(42).build();
        assert_eq!(m.what(), 42);
        assert_eq!(m.ref_count(), 1);
        assert!(m.is_empty());
        assert_eq!(m.count_names(), 0);
    }

    #[test]
    fn clone_and_drop_are_neutral_on_refcount() {
        let m = Message::new(1).build();
        let m2 = m.clone();
        assert_eq!(m.ref_count(), 2);
        drop(m2);
        assert_eq!(m.ref_count(), 1);
    }

    #[test]
    fn scalar_round_trip_including_boundaries() {
        let m = Message::new(1)
            .set_i64("min", i64::MIN)
            .set_i64("max", i64::MAX)
            .set_u64("umax", u64::MAX)
            .set_bool("flag", true)
            .set_string("s", "hello".to_string())
            .set_f64("pi", std::f64::consts::PI)
            .build();

        assert_eq!(m.get_i64("min").unwrap(), i64::MIN);
        assert_eq!(m.get_i64("max").unwrap(), i64::MAX);
        assert_eq!(m.get_u64("umax").unwrap(), u64::MAX);
        assert!(m.get_bool("flag").unwrap());
        assert_eq!(m.get_string("s").unwrap(), "hello");
        assert_eq!(m.get_f64("pi").unwrap(), std::f64::consts::PI);
    }

    #[test]
    fn get_missing_name_is_no_such_name() {
        let m = Message::new(1).build();
        assert_eq!(
            m.get_i32("missing").unwrap_err(),
            MessageError::NoSuchName { name: "missing".to_string() }
        );
    }

    #[test]
    fn get_wrong_type_is_type_mismatch() {
        let m = Message::new(1).set_i32("x", 1).build();
        assert_eq!(
            m.get_string("x").unwrap_err(),
            MessageError::TypeMismatch { name: "x".to_string() }
        );
    }

    #[test]
    fn contains_and_count_names_reflect_set_attrs() {
        let m = Message::new(1).set_i32("a", 1).set_i32("b", 2).build();
        assert!(m.contains("a"));
        assert!(!m.contains("z"));
        assert_eq!(m.count_names(), 2);
    }

    #[test]
    fn copy_is_equal_under_get_but_independently_refcounted() {
        let m = Message::new(7).set_i32("x", 9).build();
        let c = m.copy();
        assert_eq!(c.what(), m.what());
        assert_eq!(c.get_i32("x").unwrap(), m.get_i32("x").unwrap());
        assert_eq!(m.ref_count(), 1);
        assert_eq!(c.ref_count(), 1);
    }

    #[test]
    fn flattened_size_accounts_for_header_and_every_attribute() {
        let m = Message::new(1).set_i32("n", 5).build();
        // 4 (what) + 4 (name len) + 1 (name bytes "n") + 2 (tag) + 4 (value size) + 4 (i32 payload)
        assert_eq!(m.flattened_size(), 4 + 4 + 1 + 2 + 4 + 4);
    }

    #[test]
    fn flattened_size_of_string_includes_terminator() {
        let m = Message::new(1).set_string("s", "hi".to_string()).build();
        // value payload = "hi" (2 bytes) + 1 terminator
        assert_eq!(m.flattened_size(), 4 + 4 + 1 + 2 + 4 + 3);
    }

    #[test]
    fn pointer_destructor_runs_exactly_once_when_last_reference_drops() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let ptr = DestructiblePointer::new(std::ptr::null_mut(), move |_| {
            calls2.fetch_add(1, Ordering::SeqCst);
        });
        let m1 = Message::new(1).set_pointer("p", ptr).build();
        let m2 = m1.copy();
        drop(m1);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        drop(m2);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn pointer_without_destructor_drops_silently() {
        let ptr = DestructiblePointer::without_destructor(std::ptr::null_mut());
        let m = Message::new(1).set_pointer("p", ptr).build();
        drop(m);
    }
}
