//! Exception types and instances raised by test bodies.
//!
//! Exception types form a single-inheritance hierarchy rooted at
//! [`EXCEPTION`]. Expectations match raised exceptions either by exact type
//! or by subtype, so each type carries a link to its parent.

use std::fmt;

use serde::Serialize;
use serde::ser::{SerializeStruct, Serializer};
use serde_json::Value;

/// Static descriptor of an exception type.
///
/// Declare user types as statics:
///
/// ```
/// use invoker::core::exception::{ExceptionType, VALUE_ERROR};
///
/// static PARSE_ERROR: ExceptionType = ExceptionType::derived("ParseError", &VALUE_ERROR);
/// assert!(PARSE_ERROR.is_subtype_of(&VALUE_ERROR));
/// ```
#[derive(Debug)]
pub struct ExceptionType {
    name: &'static str,
    parent: Option<&'static ExceptionType>,
}

impl ExceptionType {
    /// A root type with no parent. Only [`EXCEPTION`] should use this.
    pub const fn root(name: &'static str) -> Self {
        Self { name, parent: None }
    }

    pub const fn derived(name: &'static str, parent: &'static ExceptionType) -> Self {
        Self {
            name,
            parent: Some(parent),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn parent(&self) -> Option<&'static ExceptionType> {
        self.parent
    }

    /// True if `self` is `other` or inherits from it.
    pub fn is_subtype_of(&self, other: &ExceptionType) -> bool {
        if self == other {
            return true;
        }
        let mut current = self.parent;
        while let Some(ty) = current {
            if ty == other {
                return true;
            }
            current = ty.parent;
        }
        false
    }
}

impl PartialEq for ExceptionType {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self, other) || (self.name == other.name && self.parent == other.parent)
    }
}

impl Eq for ExceptionType {}

impl fmt::Display for ExceptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

pub static EXCEPTION: ExceptionType = ExceptionType::root("Exception");
/// The framework's own assertion type. Raising it marks an assertion failure
/// rather than an unexpected exception.
pub static ASSERTION_ERROR: ExceptionType = ExceptionType::derived("AssertionError", &EXCEPTION);
pub static VALUE_ERROR: ExceptionType = ExceptionType::derived("ValueError", &EXCEPTION);
pub static TYPE_ERROR: ExceptionType = ExceptionType::derived("TypeError", &EXCEPTION);
pub static RUNTIME_ERROR: ExceptionType = ExceptionType::derived("RuntimeError", &EXCEPTION);
/// A panic caught while running a body.
pub static PANIC_ERROR: ExceptionType = ExceptionType::derived("PanicError", &RUNTIME_ERROR);
pub static TIMEOUT_ERROR: ExceptionType = ExceptionType::derived("TimeoutError", &EXCEPTION);
pub static CANCELLED_ERROR: ExceptionType = ExceptionType::derived("CancelledError", &EXCEPTION);

/// A raised exception instance.
#[derive(Debug, Clone, PartialEq)]
pub struct Exception {
    ty: &'static ExceptionType,
    message: String,
    expected: Option<Value>,
    actual: Option<Value>,
}

impl Exception {
    pub fn new(ty: &'static ExceptionType, message: impl Into<String>) -> Self {
        Self {
            ty,
            message: message.into(),
            expected: None,
            actual: None,
        }
    }

    /// An assertion failure of the framework's own assertion type.
    pub fn assertion(message: impl Into<String>) -> Self {
        Self::new(&ASSERTION_ERROR, message)
    }

    /// An assertion failure comparing two values.
    pub fn mismatch(message: impl Into<String>, expected: Value, actual: Value) -> Self {
        Self {
            ty: &ASSERTION_ERROR,
            message: message.into(),
            expected: Some(expected),
            actual: Some(actual),
        }
    }

    pub fn value_error(message: impl Into<String>) -> Self {
        Self::new(&VALUE_ERROR, message)
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(&TYPE_ERROR, message)
    }

    /// Wrap a foreign error as a `RuntimeError`, keeping the full cause chain.
    pub fn from_error(err: impl Into<anyhow::Error>) -> Self {
        let err = err.into();
        Self::new(&RUNTIME_ERROR, format!("{err:#}"))
    }

    /// Convert a caught panic payload.
    pub fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "panic with non-string payload".to_string()
        };
        Self::new(&PANIC_ERROR, message)
    }

    pub fn ty(&self) -> &'static ExceptionType {
        self.ty
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn expected(&self) -> Option<&Value> {
        self.expected.as_ref()
    }

    pub fn actual(&self) -> Option<&Value> {
        self.actual.as_ref()
    }

    pub fn is_instance_of(&self, ty: &ExceptionType) -> bool {
        self.ty.is_subtype_of(ty)
    }

    /// True if this is (a subtype of) the framework's assertion type.
    pub fn is_assertion(&self) -> bool {
        self.is_instance_of(&ASSERTION_ERROR)
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.ty)
        } else {
            write!(f, "{}: {}", self.ty, self.message)
        }
    }
}

impl std::error::Error for Exception {}

impl Serialize for Exception {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Exception", 4)?;
        state.serialize_field("type", self.ty.name)?;
        state.serialize_field("message", &self.message)?;
        state.serialize_field("expected", &self.expected)?;
        state.serialize_field("actual", &self.actual)?;
        state.end()
    }
}

#[doc(hidden)]
pub fn to_json<T: Serialize + ?Sized>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

/// Fail the current body with an assertion error unless `cond` holds.
///
/// ```
/// use invoker::check;
/// use invoker::core::exception::Exception;
///
/// fn body(x: i64) -> Result<(), Exception> {
///     check!(x > 0, "x must be positive, got {}", x);
///     Ok(())
/// }
/// assert!(body(-1).unwrap_err().is_assertion());
/// ```
#[macro_export]
macro_rules! check {
    ($cond:expr $(,)?) => {
        if !$cond {
            return ::std::result::Result::Err(
                $crate::core::exception::Exception::assertion(concat!(
                    "check failed: ",
                    stringify!($cond)
                ))
                .into(),
            );
        }
    };
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            return ::std::result::Result::Err(
                $crate::core::exception::Exception::assertion(format!($($arg)+)).into(),
            );
        }
    };
}

/// Fail the current body with an assertion error unless both sides are equal.
/// Both sides must be serializable; the failure records them as JSON.
#[macro_export]
macro_rules! check_eq {
    ($left:expr, $right:expr $(,)?) => {{
        let left = &$left;
        let right = &$right;
        if left != right {
            return ::std::result::Result::Err(
                $crate::core::exception::Exception::mismatch(
                    concat!(stringify!($left), " == ", stringify!($right)),
                    $crate::core::exception::to_json(right),
                    $crate::core::exception::to_json(left),
                )
                .into(),
            );
        }
    }};
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    static PARSE_ERROR: ExceptionType = ExceptionType::derived("ParseError", &VALUE_ERROR);

    #[test]
    fn subtype_walks_parent_chain() {
        assert!(PARSE_ERROR.is_subtype_of(&VALUE_ERROR));
        assert!(PARSE_ERROR.is_subtype_of(&EXCEPTION));
        assert!(!PARSE_ERROR.is_subtype_of(&TYPE_ERROR));
        assert!(!VALUE_ERROR.is_subtype_of(&PARSE_ERROR));
    }

    #[test]
    fn panic_is_runtime_error() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        let exc = Exception::from_panic(payload.as_ref());
        assert_eq!(exc.ty(), &PANIC_ERROR);
        assert!(exc.is_instance_of(&RUNTIME_ERROR));
        assert_eq!(exc.message(), "boom");
    }

    #[test]
    fn display_includes_type_name() {
        let exc = Exception::value_error("bad input");
        assert_eq!(exc.to_string(), "ValueError: bad input");
        assert_eq!(Exception::new(&EXCEPTION, "").to_string(), "Exception");
    }

    fn checked(x: i64) -> Result<(), Exception> {
        check_eq!(x, 4);
        Ok(())
    }

    #[test]
    fn check_eq_records_both_sides() {
        let exc = checked(5).expect_err("mismatch");
        assert!(exc.is_assertion());
        assert_eq!(exc.expected(), Some(&json!(4)));
        assert_eq!(exc.actual(), Some(&json!(5)));
        assert!(checked(4).is_ok());
    }

    #[test]
    fn serializes_type_by_name() {
        let value = serde_json::to_value(Exception::type_error("nope")).expect("serialize");
        assert_eq!(value["type"], json!("TypeError"));
        assert_eq!(value["message"], json!("nope"));
    }
}
