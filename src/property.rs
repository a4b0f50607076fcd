/// Represents any valid event property value.
///
/// Property values travel as plain JSON values in the capture payload, so
/// they are limited to strings, numerics and booleans. A numeric value is
/// represented either as a signed integer, an unsigned integer or a float.
#[derive(serde::Serialize, Debug, PartialEq, Clone)]
#[serde(untagged)]
pub enum Value {
    /// Represents a signed integer property value.
    ///
    /// ```
    /// # use posthog_transport::property::Value;
    /// #
    /// let v = Value::Int(-3);
    /// ```
    Int(i64),

    /// Represents an unsigned integer property value.
    ///
    /// ```
    /// # use posthog_transport::property::Value;
    /// #
    /// let v = Value::UInt(42);
    /// ```
    UInt(u64),

    /// Represents a string property value.
    ///
    /// ```
    /// # use posthog_transport::property::Value;
    /// #
    /// let v = Value::Str(String::from("dark_mode"));
    /// ```
    Str(String),

    /// Represents a float property value.
    ///
    /// ```
    /// # use posthog_transport::property::Value;
    /// #
    /// let v = Value::Float(3.14159);
    /// ```
    Float(f64),

    /// Represents a bool property value.
    ///
    /// ```
    /// # use posthog_transport::property::Value;
    /// #
    /// let v = Value::Bool(true);
    /// ```
    Bool(bool),
}

/// Converts an i64 to a property value.
///
/// ```
/// # use posthog_transport::property::Value;
/// #
/// let v: i64 = -5;
/// assert_eq!(Value::Int(-5), v.into());
/// ```
impl From<i64> for Value {
    fn from(value: i64) -> Value {
        Value::Int(value)
    }
}

/// Converts an i32 to a property value.
///
/// ```
/// # use posthog_transport::property::Value;
/// #
/// let v: i32 = -5;
/// assert_eq!(Value::Int(-5), v.into());
/// ```
impl From<i32> for Value {
    fn from(value: i32) -> Value {
        Value::Int(value as i64)
    }
}

/// Converts a u64 to a property value.
///
/// ```
/// # use posthog_transport::property::Value;
/// #
/// let v: u64 = 5;
/// assert_eq!(Value::UInt(5), v.into());
/// ```
impl From<u64> for Value {
    fn from(value: u64) -> Value {
        Value::UInt(value)
    }
}

/// Converts a u32 to a property value.
///
/// ```
/// # use posthog_transport::property::Value;
/// #
/// let v: u32 = 5;
/// assert_eq!(Value::UInt(5), v.into());
/// ```
impl From<u32> for Value {
    fn from(value: u32) -> Value {
        Value::UInt(value as u64)
    }
}

/// Converts a string slice to a property value.
///
/// ```
/// # use posthog_transport::property::Value;
/// #
/// let v = "premium";
/// assert_eq!(Value::Str(String::from("premium")), v.into());
/// ```
impl From<&str> for Value {
    fn from(value: &str) -> Value {
        Value::Str(value.to_string())
    }
}

/// Converts an owned string to a property value.
///
/// ```
/// # use posthog_transport::property::Value;
/// #
/// let v = String::from("premium");
/// assert_eq!(Value::Str(String::from("premium")), v.into());
/// ```
impl From<String> for Value {
    fn from(value: String) -> Value {
        Value::Str(value)
    }
}

/// Converts a f64 to a property value.
///
/// ```
/// # use posthog_transport::property::Value;
/// #
/// let v: f64 = 3.14159;
/// assert_eq!(Value::Float(v), v.into());
/// ```
impl From<f64> for Value {
    fn from(value: f64) -> Value {
        Value::Float(value)
    }
}

/// Converts a f32 to a property value.
///
/// ```
/// # use posthog_transport::property::Value;
/// #
/// let v: f32 = 3.14159;
/// assert_eq!(Value::Float(v as f64), v.into());
/// ```
impl From<f32> for Value {
    fn from(value: f32) -> Value {
        Value::Float(value as f64)
    }
}

/// Converts a bool to a property value.
///
/// ```
/// # use posthog_transport::property::Value;
/// #
/// let v = true;
/// assert_eq!(Value::Bool(true), v.into());
/// ```
impl From<bool> for Value {
    fn from(value: bool) -> Value {
        Value::Bool(value)
    }
}
