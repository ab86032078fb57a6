use crate::telemetry::Protocol;

/// Default key expression prefix for all sensorbus telemetry.
pub const KEY_PREFIX: &str = "sensorbus";

/// Builder for sensorbus key expressions.
///
/// Key expressions follow the pattern:
/// `sensorbus/<protocol>/<sensor>/<metric>`
#[derive(Debug, Clone)]
pub struct KeyExprBuilder {
    prefix: String,
    protocol: Protocol,
}

impl KeyExprBuilder {
    /// Create a new key expression builder for a protocol.
    pub fn new(protocol: Protocol) -> Self {
        Self {
            prefix: KEY_PREFIX.to_string(),
            protocol,
        }
    }

    /// Create a builder with a custom prefix.
    pub fn with_prefix(prefix: impl Into<String>, protocol: Protocol) -> Self {
        Self {
            prefix: prefix.into(),
            protocol,
        }
    }

    /// Build a key expression for one metric of a sensor.
    ///
    /// # Example
    /// ```
    /// use sensorbus_common::keyexpr::KeyExprBuilder;
    /// use sensorbus_common::telemetry::Protocol;
    ///
    /// let builder = KeyExprBuilder::new(Protocol::Modbus);
    /// let key = builder.build("tank1", "liquid_level");
    /// assert_eq!(key, "sensorbus/modbus/tank1/liquid_level");
    /// ```
    pub fn build(&self, sensor: &str, metric: &str) -> String {
        format!(
            "{}/{}/{}/{}",
            self.prefix,
            self.protocol.as_str(),
            sensor,
            metric
        )
    }

    /// Wildcard matching every metric of a sensor.
    pub fn sensor_wildcard(&self, sensor: &str) -> String {
        format!("{}/{}/{}/**", self.prefix, self.protocol.as_str(), sensor)
    }

    /// Wildcard matching every sensor of this protocol.
    pub fn protocol_wildcard(&self) -> String {
        format!("{}/{}/**", self.prefix, self.protocol.as_str())
    }

    /// Key holding the static attributes of a sensor.
    ///
    /// # Example
    /// ```
    /// use sensorbus_common::keyexpr::KeyExprBuilder;
    /// use sensorbus_common::telemetry::Protocol;
    ///
    /// let builder = KeyExprBuilder::new(Protocol::Modbus);
    /// assert_eq!(builder.attributes_key("ph1"), "sensorbus/modbus/@/sensors/ph1/attributes");
    /// ```
    pub fn attributes_key(&self, sensor: &str) -> String {
        format!(
            "{}/{}/@/sensors/{}/attributes",
            self.prefix,
            self.protocol.as_str(),
            sensor
        )
    }

    /// Key for bridge status.
    pub fn status_key(&self) -> String {
        format!("{}/{}/@/status", self.prefix, self.protocol.as_str())
    }
}

/// Wildcard matching all sensorbus telemetry.
///
/// # Example
/// ```
/// use sensorbus_common::keyexpr::all_telemetry_wildcard;
///
/// assert_eq!(all_telemetry_wildcard(), "sensorbus/**");
/// ```
pub fn all_telemetry_wildcard() -> String {
    format!("{}/**", KEY_PREFIX)
}

/// Wildcard matching the health snapshots of all bridges.
pub fn all_health_wildcard() -> String {
    format!("{}/*/@/health", KEY_PREFIX)
}

/// Wildcard matching per-sensor liveness of all bridges.
///
/// Matches: `sensorbus/<protocol>/@/sensors/<sensor>/liveness`
pub fn all_liveness_wildcard() -> String {
    format!("{}/*/@/sensors/*/liveness", KEY_PREFIX)
}

/// Wildcard matching error reports of all bridges.
pub fn all_errors_wildcard() -> String {
    format!("{}/*/@/errors", KEY_PREFIX)
}

/// Parse a telemetry key expression into protocol, sensor and metric.
///
/// Returns `None` for keys outside the prefix, for unknown protocols and for
/// bridge metadata keys (`<prefix>/<protocol>/@/...`).
pub fn parse_key_expr(key: &str) -> Option<ParsedKeyExpr<'_>> {
    let parts: Vec<&str> = key.split('/').collect();

    if parts.len() < 4 || parts[0] != KEY_PREFIX || parts[2] == "@" {
        return None;
    }

    let protocol = Protocol::from_key_segment(parts[1])?;
    let sensor = parts[2];
    let metric = parts[3..].join("/");

    Some(ParsedKeyExpr {
        protocol,
        sensor,
        metric,
    })
}

/// Parsed components of a sensorbus telemetry key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedKeyExpr<'a> {
    pub protocol: Protocol,
    pub sensor: &'a str,
    pub metric: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_builder() {
        let builder = KeyExprBuilder::new(Protocol::Modbus);

        assert_eq!(
            builder.build("flow1", "pos_flow_acc"),
            "sensorbus/modbus/flow1/pos_flow_acc"
        );
        assert_eq!(builder.sensor_wildcard("flow1"), "sensorbus/modbus/flow1/**");
        assert_eq!(builder.protocol_wildcard(), "sensorbus/modbus/**");
        assert_eq!(builder.status_key(), "sensorbus/modbus/@/status");
    }

    #[test]
    fn test_custom_prefix() {
        let builder = KeyExprBuilder::with_prefix("plant/a", Protocol::Modbus);
        assert_eq!(builder.build("ph1", "ph_value"), "plant/a/modbus/ph1/ph_value");
    }

    #[test]
    fn test_parse_key_expr() {
        let parsed = parse_key_expr("sensorbus/modbus/tank1/volume_percentage").unwrap();

        assert_eq!(parsed.protocol, Protocol::Modbus);
        assert_eq!(parsed.sensor, "tank1");
        assert_eq!(parsed.metric, "volume_percentage");
    }

    #[test]
    fn test_parse_invalid_key() {
        assert!(parse_key_expr("invalid/key").is_none());
        assert!(parse_key_expr("sensorbus/unknown/sensor/metric").is_none());
        assert!(parse_key_expr("other/modbus/sensor/metric").is_none());
        assert!(parse_key_expr("sensorbus/modbus/@/status").is_none());
    }

    #[test]
    fn test_metadata_wildcards() {
        assert_eq!(all_telemetry_wildcard(), "sensorbus/**");
        assert_eq!(all_health_wildcard(), "sensorbus/*/@/health");
        assert_eq!(all_liveness_wildcard(), "sensorbus/*/@/sensors/*/liveness");
        assert_eq!(all_errors_wildcard(), "sensorbus/*/@/errors");
    }
}
