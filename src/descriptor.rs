use crate::{Error, Result};
use std::any::{type_name, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

/// Identity of a broker topic together with the record type published to it.
///
/// Descriptors are cheap value objects: two descriptors are equal iff their
/// ids are equal and they carry the same record type. They are used as lookup
/// keys against the registry and as documentation of the payload type; the
/// core never uses the type for serialization.
pub struct TopicDescriptor<T> {
    id: String,
    _record: PhantomData<fn() -> T>,
}

impl<T: 'static> TopicDescriptor<T> {
    /// Creates a descriptor for the topic named `id` carrying records of type `T`.
    ///
    /// Fails with [`Error::InvalidArgument`] if `id` is empty.
    pub fn of(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(Error::InvalidArgument(
                "topic id must not be empty".to_string(),
            ));
        }
        Ok(Self {
            id,
            _record: PhantomData,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn record_type(&self) -> TypeId {
        TypeId::of::<T>()
    }

    pub fn record_type_name(&self) -> &'static str {
        type_name::<T>()
    }
}

impl<T> Clone for TopicDescriptor<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            _record: PhantomData,
        }
    }
}

impl<T: 'static> fmt::Debug for TopicDescriptor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TopicDescriptor")
            .field("id", &self.id)
            .field("record_type", &type_name::<T>())
            .finish()
    }
}

impl<T: 'static> PartialEq for TopicDescriptor<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T: 'static> Eq for TopicDescriptor<T> {}

impl<T: 'static> Hash for TopicDescriptor<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
        TypeId::of::<T>().hash(state);
    }
}

/// Identity of a service instance under which producer sets are cached.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceInstanceId(String);

impl ServiceInstanceId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServiceInstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ServiceInstanceId {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for ServiceInstanceId {
    fn from(name: String) -> Self {
        Self(name)
    }
}
