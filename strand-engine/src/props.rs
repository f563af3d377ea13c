//! Property catalog: names, scopes, types and defaults.
//!
//! Dumps list properties in catalog order, so the table order is part of the
//! observable behavior.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Scope {
    Global,
    Topic,
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum PropType {
    Str,
    Bool,
    Int { min: i64, max: i64 },
    Enum(&'static [&'static str]),
    /// Comma-separated subset of the listed values
    EnumList(&'static [&'static str]),
    /// Function pointer binding; not settable through the string API
    Callback,
}

#[derive(Debug)]
pub(crate) struct Property {
    pub name: &'static str,
    pub scope: Scope,
    pub ty: PropType,
    pub default: &'static str,
}

const fn prop(name: &'static str, scope: Scope, ty: PropType, default: &'static str) -> Property {
    Property {
        name,
        scope,
        ty,
        default,
    }
}

const AUTO_OFFSET_RESET: &[&str] = &[
    "smallest",
    "earliest",
    "beginning",
    "largest",
    "latest",
    "end",
    "error",
];

const ASSIGNMENT_STRATEGIES: &[&str] = &["range", "roundrobin"];

const COMPRESSION: &[&str] = &["none", "gzip", "snappy", "lz4", "zstd", "inherit"];

const PARTITIONERS: &[&str] = &[
    "random",
    "consistent",
    "consistent_random",
    "murmur2",
    "murmur2_random",
    "fnv1a",
    "fnv1a_random",
];

pub(crate) static PROPERTIES: &[Property] = &[
    prop("client.id", Scope::Global, PropType::Str, "rdkafka"),
    prop("bootstrap.servers", Scope::Global, PropType::Str, ""),
    prop("socket.timeout.ms", Scope::Global, PropType::Int { min: 10, max: 300_000 }, "60000"),
    prop("statistics.interval.ms", Scope::Global, PropType::Int { min: 0, max: 86_400_000 }, "0"),
    prop("log_level", Scope::Global, PropType::Int { min: 0, max: 7 }, "6"),
    prop("api.version.request", Scope::Global, PropType::Bool, "true"),
    prop("error_cb", Scope::Global, PropType::Callback, "0x0"),
    prop("log_cb", Scope::Global, PropType::Callback, "0x0"),
    prop("stats_cb", Scope::Global, PropType::Callback, "0x0"),
    prop("group.id", Scope::Global, PropType::Str, ""),
    prop("group.instance.id", Scope::Global, PropType::Str, ""),
    prop(
        "partition.assignment.strategy",
        Scope::Global,
        PropType::EnumList(ASSIGNMENT_STRATEGIES),
        "range,roundrobin",
    ),
    prop("session.timeout.ms", Scope::Global, PropType::Int { min: 1, max: 3_600_000 }, "45000"),
    prop("heartbeat.interval.ms", Scope::Global, PropType::Int { min: 1, max: 3_600_000 }, "3000"),
    prop("enable.auto.commit", Scope::Global, PropType::Bool, "true"),
    prop("auto.commit.interval.ms", Scope::Global, PropType::Int { min: 0, max: 86_400_000 }, "5000"),
    prop("enable.auto.offset.store", Scope::Global, PropType::Bool, "true"),
    prop("queued.min.messages", Scope::Global, PropType::Int { min: 1, max: 10_000_000 }, "100000"),
    prop("fetch.wait.max.ms", Scope::Global, PropType::Int { min: 0, max: 300_000 }, "500"),
    prop("fetch.min.bytes", Scope::Global, PropType::Int { min: 1, max: 100_000_000 }, "1"),
    prop("enable.partition.eof", Scope::Global, PropType::Bool, "true"),
    prop("rebalance_cb", Scope::Global, PropType::Callback, "0x0"),
    prop("offset_commit_cb", Scope::Global, PropType::Callback, "0x0"),
    prop("consume_cb", Scope::Global, PropType::Callback, "0x0"),
    prop("request.required.acks", Scope::Topic, PropType::Int { min: -1, max: 1000 }, "-1"),
    prop("message.timeout.ms", Scope::Topic, PropType::Int { min: 0, max: 2_147_483_647 }, "300000"),
    prop("partitioner", Scope::Topic, PropType::Enum(PARTITIONERS), "consistent_random"),
    prop("partitioner_cb", Scope::Topic, PropType::Callback, "0x0"),
    prop("compression.codec", Scope::Topic, PropType::Enum(COMPRESSION), "inherit"),
    prop("auto.offset.reset", Scope::Topic, PropType::Enum(AUTO_OFFSET_RESET), "largest"),
    prop("consume.callback.max.messages", Scope::Topic, PropType::Int { min: 0, max: 1_000_000 }, "0"),
];

pub(crate) fn lookup(name: &str) -> Option<(usize, &'static Property)> {
    PROPERTIES.iter().enumerate().find(|(_, p)| p.name == name)
}

/// Indices of every property in `scope`, in catalog order.
pub(crate) fn indices(scope: Scope) -> impl Iterator<Item = usize> {
    PROPERTIES
        .iter()
        .enumerate()
        .filter(move |(_, p)| p.scope == scope)
        .map(|(i, _)| i)
}

pub(crate) fn no_such_property(name: &str) -> String {
    format!("No such configuration property: \"{name}\"")
}

impl Property {
    /// Validate and normalize a value. Errors carry the engine diagnostic.
    pub(crate) fn validate(&self, value: &str) -> Result<String, String> {
        let invalid = || {
            format!(
                "Invalid value \"{value}\" for configuration property \"{}\"",
                self.name
            )
        };

        match self.ty {
            PropType::Str => Ok(value.to_string()),
            PropType::Bool => match value.to_ascii_lowercase().as_str() {
                "true" | "t" | "1" => Ok("true".to_string()),
                "false" | "f" | "0" => Ok("false".to_string()),
                _ => Err(format!(
                    "Expected bool value for \"{}\": true or false",
                    self.name
                )),
            },
            PropType::Int { min, max } => {
                let n: i64 = value.trim().parse().map_err(|_| invalid())?;
                if n < min || n > max {
                    return Err(format!(
                        "Configuration property \"{}\" value {n} is outside allowed range {min}..{max}",
                        self.name
                    ));
                }
                Ok(n.to_string())
            },
            PropType::Enum(allowed) => {
                let v = value.trim();
                if allowed.contains(&v) {
                    Ok(v.to_string())
                } else {
                    Err(invalid())
                }
            },
            PropType::EnumList(allowed) => {
                let parts: Vec<&str> = value.split(',').map(str::trim).collect();
                if parts.is_empty() || parts.iter().any(|p| !allowed.contains(p)) {
                    return Err(invalid());
                }
                Ok(parts.join(","))
            },
            PropType::Callback => Err(format!(
                "Property \"{}\" must be set through its dedicated setter function",
                self.name
            )),
        }
    }
}
