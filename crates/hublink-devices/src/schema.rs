/*!
 * Attribute schemas for function classes.
 *
 * A device class is described entirely by data: a class name and the list of
 * attributes it exposes, each with a wire encoding, a cache policy and an
 * access mode. The generic function proxy interprets the schema, so
 * class-specific behaviour like fixed-point fields never needs its own code.
 */
use hublink_core::error::{Error, Result};
use hublink_core::types::Value;

/// Sentinel returned for a floating-point attribute that could not be read
pub const INVALID_DOUBLE: f64 = -f64::MAX;
/// Sentinel returned for a string attribute that could not be read
pub const INVALID_STRING: &str = "!INVALID!";
/// Sentinel returned for an integer attribute that could not be read
pub const INVALID_INT: i64 = i32::MAX as i64;
/// Sentinel returned for an enumerated attribute that could not be read
pub const INVALID_ENUM: i64 = -1;

/// Scale factor of fixed-point attributes on the wire
pub const FIXED_POINT_SCALE: f64 = 65536.0;

/// Longest logical name accepted by modules
pub const MAX_LOGICAL_NAME_LEN: usize = 19;

/// Decode a fixed-point wire value, rounding to three decimal places
pub fn decode_fixed(raw: f64) -> f64 {
    (raw * 1000.0 / FIXED_POINT_SCALE).round() / 1000.0
}

/// Encode a value to its fixed-point wire representation
///
/// Modules carry fixed-point values as signed 32-bit integers; anything that
/// does not fit is rejected.
pub fn encode_fixed(value: f64) -> Result<i64> {
    let scaled = (value * FIXED_POINT_SCALE).round();
    if !scaled.is_finite() || scaled < i32::MIN as f64 || scaled > i32::MAX as f64 {
        return Err(Error::invalid_argument(format!(
            "{} does not fit a fixed-point attribute",
            value
        )));
    }
    Ok(scaled as i64)
}

/// Check that a logical name only uses characters modules accept
pub fn check_logical_name(name: &str) -> Result<()> {
    if name.len() > MAX_LOGICAL_NAME_LEN {
        return Err(Error::invalid_argument(format!(
            "logical name '{}' is longer than {} characters",
            name, MAX_LOGICAL_NAME_LEN
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(Error::invalid_argument(format!(
            "logical name '{}' contains invalid characters",
            name
        )));
    }
    Ok(())
}

/// How an attribute is represented on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Plain JSON string
    Text,
    /// JSON string restricted to the logical-name alphabet
    Name,
    /// Plain JSON integer
    Integer,
    /// JSON integer 0 or 1, read back as a two-member enumeration
    Bool,
    /// JSON integer selecting an enumeration member
    Enum,
    /// JSON integer holding the value multiplied by 65536
    Fixed,
}

/// When a cached attribute value must be refreshed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    /// Valid until the proxy's shared expiration elapses
    Timed,
    /// Loaded once, kept until the cache is explicitly invalidated
    Lazy,
    /// Every read performs a load
    Immediate,
}

/// Attribute access mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Read-only attribute
    ReadOnly,
    /// Read-write attribute
    ReadWrite,
}

/// Description of one attribute of a function class
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttributeSpec {
    /// The attribute name, as used in the JSON object and in set requests
    pub name: &'static str,
    /// Wire encoding
    pub encoding: Encoding,
    /// Cache policy
    pub policy: CachePolicy,
    /// Access mode
    pub access: Access,
    /// Inclusive accepted range for writes, in decoded units
    pub range: Option<(f64, f64)>,
}

impl AttributeSpec {
    /// A read-only, timed attribute
    pub const fn new(name: &'static str, encoding: Encoding) -> Self {
        Self {
            name,
            encoding,
            policy: CachePolicy::Timed,
            access: Access::ReadOnly,
            range: None,
        }
    }

    /// Use the lazy cache policy
    pub const fn lazy(mut self) -> Self {
        self.policy = CachePolicy::Lazy;
        self
    }

    /// Use the immediate cache policy
    pub const fn immediate(mut self) -> Self {
        self.policy = CachePolicy::Immediate;
        self
    }

    /// Allow writes
    pub const fn writable(mut self) -> Self {
        self.access = Access::ReadWrite;
        self
    }

    /// Restrict writes to `[min, max]`
    pub const fn range(mut self, min: f64, max: f64) -> Self {
        self.range = Some((min, max));
        self
    }

    /// Whether the attribute accepts writes
    pub fn is_writable(&self) -> bool {
        self.access == Access::ReadWrite
    }

    /// The sentinel returned when the attribute cannot be read
    pub fn invalid(&self) -> Value {
        match self.encoding {
            Encoding::Text | Encoding::Name => Value::String(INVALID_STRING.to_string()),
            Encoding::Integer => Value::Integer(INVALID_INT),
            Encoding::Enum | Encoding::Bool => Value::Integer(INVALID_ENUM),
            Encoding::Fixed => Value::Float(INVALID_DOUBLE),
        }
    }

    /// Decode the attribute from its JSON representation
    pub fn decode(&self, raw: &serde_json::Value) -> Result<Value> {
        use serde_json::Value as Json;

        let mismatch = || {
            Error::serialization(format!(
                "attribute {} has unexpected JSON value {}",
                self.name, raw
            ))
        };

        match (self.encoding, raw) {
            (Encoding::Text | Encoding::Name, Json::String(s)) => Ok(Value::String(s.clone())),
            (Encoding::Text | Encoding::Name, Json::Number(n)) => Ok(Value::String(n.to_string())),
            (Encoding::Integer | Encoding::Enum, Json::Number(n)) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .map(Value::Integer)
                .ok_or_else(mismatch),
            (Encoding::Integer | Encoding::Enum, Json::String(s)) => {
                s.trim().parse::<i64>().map(Value::Integer).map_err(|_| mismatch())
            }
            (Encoding::Bool, Json::Bool(b)) => Ok(Value::Integer(i64::from(*b))),
            (Encoding::Bool, Json::Number(n)) => n
                .as_i64()
                .map(|i| Value::Integer(i64::from(i != 0)))
                .ok_or_else(mismatch),
            (Encoding::Fixed, Json::Number(n)) => n
                .as_f64()
                .map(|raw| Value::Float(decode_fixed(raw)))
                .ok_or_else(mismatch),
            (Encoding::Fixed, Json::String(s)) => s
                .trim()
                .parse::<f64>()
                .map(|raw| Value::Float(decode_fixed(raw)))
                .map_err(|_| mismatch()),
            _ => Err(mismatch()),
        }
    }

    /// Validate a value and produce its wire text for a set request
    pub fn encode(&self, value: &Value) -> Result<String> {
        if !self.is_writable() {
            return Err(Error::invalid_argument(format!(
                "attribute {} is read-only",
                self.name
            )));
        }

        let mismatch = |expected: &str| {
            Error::invalid_argument(format!(
                "attribute {} expects {}, got {}",
                self.name,
                expected,
                value.kind()
            ))
        };

        match self.encoding {
            Encoding::Text => value
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| mismatch("string")),
            Encoding::Name => {
                let name = value.as_str().ok_or_else(|| mismatch("string"))?;
                check_logical_name(name)?;
                Ok(name.to_string())
            }
            Encoding::Bool => match value {
                Value::Bool(b) => Ok(u8::from(*b).to_string()),
                Value::Integer(i @ (0 | 1)) => Ok(i.to_string()),
                _ => Err(mismatch("bool")),
            },
            Encoding::Integer | Encoding::Enum => {
                let i = value.as_integer().ok_or_else(|| mismatch("integer"))?;
                self.check_range(i as f64)?;
                Ok(i.to_string())
            }
            Encoding::Fixed => {
                let f = value.as_float().ok_or_else(|| mismatch("number"))?;
                if !f.is_finite() {
                    return Err(Error::invalid_argument(format!(
                        "attribute {} does not accept {}",
                        self.name, f
                    )));
                }
                self.check_range(f)?;
                Ok(encode_fixed(f)?.to_string())
            }
        }
    }

    fn check_range(&self, v: f64) -> Result<()> {
        match self.range {
            Some((min, max)) if v < min || v > max => Err(Error::invalid_argument(format!(
                "{} is outside the accepted range [{}, {}] of {}",
                v, min, max, self.name
            ))),
            _ => Ok(()),
        }
    }
}

/// Attribute carried by every function class: the user-assigned name
pub const LOGICAL_NAME: &str = "logicalName";
/// Attribute carried by every function class: the short state summary
pub const ADVERTISED_VALUE: &str = "advertisedValue";

/// Attributes shared by every function class
pub static COMMON_ATTRIBUTES: &[AttributeSpec] = &[
    AttributeSpec::new(LOGICAL_NAME, Encoding::Name).lazy().writable(),
    AttributeSpec::new(ADVERTISED_VALUE, Encoding::Text),
];

/// Description of one function class
#[derive(Debug, PartialEq)]
pub struct FunctionSchema {
    /// Class name, as used in the hub's yellow pages
    pub class_name: &'static str,
    /// Class-specific attributes
    pub attributes: &'static [AttributeSpec],
}

impl FunctionSchema {
    /// Look up an attribute, class-specific ones first
    pub fn attribute(&self, name: &str) -> Result<&'static AttributeSpec> {
        self.attributes
            .iter()
            .chain(COMMON_ATTRIBUTES.iter())
            .find(|spec| spec.name == name)
            .ok_or_else(|| {
                Error::invalid_argument(format!(
                    "{} has no attribute named {}",
                    self.class_name, name
                ))
            })
    }

    /// Every attribute of the class, including the common ones
    pub fn all_attributes(&self) -> impl Iterator<Item = &'static AttributeSpec> {
        self.attributes.iter().chain(COMMON_ATTRIBUTES.iter())
    }

    /// The function identifier modules assign to the first function of this class
    pub fn default_function_id(&self) -> String {
        let mut chars = self.class_name.chars();
        match chars.next() {
            Some(first) => first.to_ascii_lowercase().to_string() + chars.as_str(),
            None => String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    static TEST_SCHEMA: FunctionSchema = FunctionSchema {
        class_name: "CurrentLoopOutput",
        attributes: &[
            AttributeSpec::new("current", Encoding::Fixed).writable().range(3.0, 21.0),
            AttributeSpec::new("loopPower", Encoding::Enum),
            AttributeSpec::new("mode", Encoding::Enum).writable().range(0.0, 2.0),
            AttributeSpec::new("enabled", Encoding::Bool).writable(),
            AttributeSpec::new("offset", Encoding::Fixed).writable(),
        ],
    };

    #[test]
    fn test_fixed_point_examples() {
        assert_eq!(encode_fixed(2.5).unwrap(), 163840);
        assert_eq!(decode_fixed(163840.0), 2.5);
        assert_eq!(encode_fixed(4.0).unwrap(), 262144);
        assert_eq!(decode_fixed(-65536.0), -1.0);
    }

    #[test]
    fn test_fixed_point_round_trip_to_three_decimals() {
        let mut x = -50.0;
        while x <= 150.0 {
            let back = decode_fixed(encode_fixed(x).unwrap() as f64);
            assert!((back - x).abs() < 0.0005, "{} came back as {}", x, back);
            x += 0.125;
        }
        for x in [3.001, 12.345, 20.999, 0.001, 99.999] {
            assert_eq!(decode_fixed(encode_fixed(x).unwrap() as f64), x);
        }
    }

    #[test]
    fn test_fixed_point_rejects_values_outside_32_bits() {
        assert!(encode_fixed(32767.0).is_ok());
        assert!(encode_fixed(-32768.0).is_ok());
        assert!(matches!(encode_fixed(32768.0), Err(Error::InvalidArgument(_))));
        assert!(encode_fixed(1e300).is_err());

        let offset = TEST_SCHEMA.attribute("offset").unwrap();
        assert_eq!(offset.encode(&Value::Float(-1.0)).unwrap(), "-65536");
        assert!(matches!(
            offset.encode(&Value::Float(1e12)),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_bool_reads_share_the_sentinel_type() {
        let enabled = TEST_SCHEMA.attribute("enabled").unwrap();
        assert_eq!(enabled.decode(&json!(true)).unwrap(), Value::Integer(1));
        assert_eq!(enabled.decode(&json!(0)).unwrap(), Value::Integer(0));
        assert_eq!(enabled.invalid(), Value::Integer(INVALID_ENUM));
        assert_eq!(enabled.decode(&json!(1)).unwrap().kind(), enabled.invalid().kind());

        assert_eq!(enabled.encode(&Value::Bool(true)).unwrap(), "1");
        assert_eq!(enabled.encode(&Value::Integer(0)).unwrap(), "0");
        assert!(enabled.encode(&Value::Integer(2)).is_err());
    }

    #[test]
    fn test_decode() {
        let current = TEST_SCHEMA.attribute("current").unwrap();
        assert_eq!(current.decode(&json!(262144)).unwrap(), Value::Float(4.0));
        assert_eq!(current.decode(&json!("163840")).unwrap(), Value::Float(2.5));
        assert!(current.decode(&json!([1])).is_err());

        let name = TEST_SCHEMA.attribute(LOGICAL_NAME).unwrap();
        assert_eq!(name.decode(&json!("TX1")).unwrap(), Value::from("TX1"));

        let power = TEST_SCHEMA.attribute("loopPower").unwrap();
        assert_eq!(power.decode(&json!(2)).unwrap(), Value::Integer(2));
    }

    #[test]
    fn test_encode() {
        let current = TEST_SCHEMA.attribute("current").unwrap();
        assert_eq!(current.encode(&Value::Float(2.5 + 1.0)).unwrap(), "229376");
        assert_eq!(current.encode(&Value::Integer(4)).unwrap(), "262144");
        assert!(matches!(
            current.encode(&Value::Float(25.0)),
            Err(Error::InvalidArgument(_))
        ));
        assert!(current.encode(&Value::Float(f64::NAN)).is_err());
        assert!(current.encode(&Value::from("4")).is_err());

        let power = TEST_SCHEMA.attribute("loopPower").unwrap();
        assert!(matches!(
            power.encode(&Value::Integer(1)),
            Err(Error::InvalidArgument(_))
        ));

        let mode = TEST_SCHEMA.attribute("mode").unwrap();
        assert_eq!(mode.encode(&Value::Integer(2)).unwrap(), "2");
        assert!(mode.encode(&Value::Integer(3)).is_err());
    }

    #[test]
    fn test_logical_name_rules() {
        let name = TEST_SCHEMA.attribute(LOGICAL_NAME).unwrap();
        assert_eq!(name.policy, CachePolicy::Lazy);
        assert_eq!(name.encode(&Value::from("pump_1-a")).unwrap(), "pump_1-a");
        assert!(name.encode(&Value::from("bad name")).is_err());
        assert!(name.encode(&Value::from("a".repeat(20))).is_err());
        assert!(name.encode(&Value::from("")).is_ok());
    }

    #[test]
    fn test_sentinels() {
        let current = TEST_SCHEMA.attribute("current").unwrap();
        assert_eq!(current.invalid(), Value::Float(INVALID_DOUBLE));
        let name = TEST_SCHEMA.attribute(ADVERTISED_VALUE).unwrap();
        assert_eq!(name.invalid(), Value::from(INVALID_STRING));
        let power = TEST_SCHEMA.attribute("loopPower").unwrap();
        assert_eq!(power.invalid(), Value::Integer(INVALID_ENUM));
    }

    #[test]
    fn test_schema_lookup() {
        assert!(TEST_SCHEMA.attribute("nope").is_err());
        assert_eq!(TEST_SCHEMA.all_attributes().count(), 7);
        assert_eq!(TEST_SCHEMA.default_function_id(), "currentLoopOutput");
    }
}
