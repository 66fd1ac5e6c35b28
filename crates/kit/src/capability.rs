//! Optional response capabilities and their resolution.
//!
//! A response value or an error may carry a status code, extra headers, or its own JSON
//! form. Each of these is a narrow trait ([`StatusCoder`], [`Headerer`],
//! [`JsonMarshaler`]), and [`Capabilities`] is how the pipeline asks a value which of them it
//! provides. The default answer is "none", so opting a type in is a one-liner:
//!
//! ```
//! use http::StatusCode;
//! use micro_kit::capability::{Capabilities, StatusCoder};
//!
//! struct Accepted;
//!
//! impl StatusCoder for Accepted {
//!     fn status_code(&self) -> StatusCode {
//!         StatusCode::ACCEPTED
//!     }
//! }
//!
//! impl Capabilities for Accepted {
//!     fn as_status_coder(&self) -> Option<&dyn StatusCoder> {
//!         Some(self)
//!     }
//! }
//! ```

use http::{HeaderMap, StatusCode};
use serde::{Serialize, Serializer};
use std::collections::{BTreeMap, HashMap};

pub trait StatusCoder {
    fn status_code(&self) -> StatusCode;
}

pub trait Headerer {
    /// Headers appended to the response after the content type is set.
    fn headers(&self) -> HeaderMap;
}

pub trait JsonMarshaler {
    /// The JSON body to send instead of the default rendering.
    fn marshal_json(&self) -> Result<Vec<u8>, serde_json::Error>;
}

/// Lists the capabilities a value provides.
pub trait Capabilities {
    fn as_status_coder(&self) -> Option<&dyn StatusCoder> {
        None
    }

    fn as_headerer(&self) -> Option<&dyn Headerer> {
        None
    }

    fn as_json_marshaler(&self) -> Option<&dyn JsonMarshaler> {
        None
    }
}

macro_rules! impl_no_capabilities {
    ($($ty:ty),* $(,)?) => {
        $(impl Capabilities for $ty {})*
    };
}

impl_no_capabilities! {
    (), bool, char, String, &'static str,
    i8, i16, i32, i64, i128, isize,
    u8, u16, u32, u64, u128, usize,
    f32, f64,
    serde_json::Value,
    std::io::Error, std::str::Utf8Error, std::string::FromUtf8Error,
    serde_json::Error, serde_qs::Error, serde_urlencoded::de::Error,
}

impl<T> Capabilities for Vec<T> {}
impl<T> Capabilities for Option<T> {}
impl<K, V, S> Capabilities for HashMap<K, V, S> {}
impl<K, V> Capabilities for BTreeMap<K, V> {}

impl<T: Capabilities + ?Sized> Capabilities for Box<T> {
    fn as_status_coder(&self) -> Option<&dyn StatusCoder> {
        (**self).as_status_coder()
    }

    fn as_headerer(&self) -> Option<&dyn Headerer> {
        (**self).as_headerer()
    }

    fn as_json_marshaler(&self) -> Option<&dyn JsonMarshaler> {
        (**self).as_json_marshaler()
    }
}

/// Status code and extra headers resolved for one value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub status: StatusCode,
    pub headers: HeaderMap,
}

impl Resolution {
    /// Looks up the status and headers of `value`, falling back to `default_status` and no
    /// extra headers. Resolving never mutates the value, so it is safe to repeat.
    pub fn of<T: Capabilities + ?Sized>(value: &T, default_status: StatusCode) -> Self {
        let status = value.as_status_coder().map_or(default_status, StatusCoder::status_code);
        let headers = value.as_headerer().map(Headerer::headers).unwrap_or_default();
        Self { status, headers }
    }

    /// Appends the resolved headers, keeping any value already present under the same name.
    pub fn append_headers_to(&self, target: &mut HeaderMap) {
        for (name, value) in &self.headers {
            target.append(name, value.clone());
        }
    }
}

/// Pairs a response value with an explicit status code.
///
/// The body is whatever the wrapped value renders to, its own JSON form included, and its
/// headers, if any, are forwarded.
///
/// ```
/// use http::StatusCode;
/// use micro_kit::capability::{Resolution, WithStatus};
///
/// let created = WithStatus::created(serde_json::json!({ "id": 1 }));
/// assert_eq!(Resolution::of(&created, StatusCode::OK).status, StatusCode::CREATED);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WithStatus<T> {
    status: StatusCode,
    value: T,
}

impl<T> WithStatus<T> {
    pub fn new(status: StatusCode, value: T) -> Self {
        Self { status, value }
    }

    pub fn created(value: T) -> Self {
        Self::new(StatusCode::CREATED, value)
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn into_inner(self) -> T {
        self.value
    }
}

impl<T> StatusCoder for WithStatus<T> {
    fn status_code(&self) -> StatusCode {
        self.status
    }
}

impl<T: Serialize + Capabilities> JsonMarshaler for WithStatus<T> {
    fn marshal_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        match self.value.as_json_marshaler() {
            Some(marshaler) => marshaler.marshal_json(),
            None => serde_json::to_vec(&self.value),
        }
    }
}

impl<T: Serialize + Capabilities> Capabilities for WithStatus<T> {
    fn as_status_coder(&self) -> Option<&dyn StatusCoder> {
        Some(self)
    }

    fn as_headerer(&self) -> Option<&dyn Headerer> {
        self.value.as_headerer()
    }

    fn as_json_marshaler(&self) -> Option<&dyn JsonMarshaler> {
        Some(self)
    }
}

impl<T: Serialize> Serialize for WithStatus<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.value.serialize(serializer)
    }
}
