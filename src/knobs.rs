//! Closed enums for the build procedure's configuration knobs
//!
//! Every knob has a canonical serialized name (used in `asgipack.toml`, env vars and
//! CLI flags), a display name, and optional aliases accepted on input.

#[macro_export]
macro_rules! define_knob_enum {
    (
        $(#[$enum_meta:meta])*
        $enum_name:ident {
            $(
                $(#[$variant_meta:meta])*
                $variant:ident => $serde_name:literal : $display_name:literal
                $( | $alias:literal )*
            ),* $(,)?
        }
    ) => {
        $(#[$enum_meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $enum_name {
            $(
                $(#[$variant_meta])*
                $variant,
            )*
        }

        impl serde::Serialize for $enum_name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> serde::Deserialize<'de> for $enum_name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }

        impl std::str::FromStr for $enum_name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::from_name(&s.to_lowercase()).ok_or_else(|| {
                    let valid: Vec<&str> = Self::all_variants().iter().map(|v| v.as_str()).collect();
                    format!(
                        "Invalid {}: {}. Valid options: {}",
                        stringify!($enum_name),
                        s,
                        valid.join(", ")
                    )
                })
            }
        }

        impl std::fmt::Display for $enum_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl $enum_name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(
                        Self::$variant => $serde_name,
                    )*
                }
            }

            pub fn name(&self) -> &'static str {
                match self {
                    $(
                        Self::$variant => $display_name,
                    )*
                }
            }

            pub fn from_name(name: &str) -> Option<Self> {
                match name {
                    $(
                        $serde_name $(| $alias)* => Some(Self::$variant),
                    )*
                    _ => None,
                }
            }

            pub fn all_variants() -> &'static [Self] {
                &[
                    $(
                        Self::$variant,
                    )*
                ]
            }
        }
    };
}

define_knob_enum! {
    /// Tool that installs the third-party dependency set
    Resolver {
        /// Lockfile-aware, frozen install from `uv.lock`
        Uv => "uv" : "uv",
        /// Lockfile-aware, frozen install from `poetry.lock`
        Poetry => "poetry" : "Poetry",
        /// Flat requirement list; reproducible only if every line is pinned
        Pip => "pip" : "pip" | "requirements",
    }
}

impl Resolver {
    /// Whether this resolver installs from a resolved lock file
    pub fn is_lockfile_driven(&self) -> bool {
        !matches!(self, Resolver::Pip)
    }

    /// Manifest file the resolver reads
    pub fn manifest_file(&self) -> &'static str {
        match self {
            Resolver::Uv | Resolver::Poetry => "pyproject.toml",
            Resolver::Pip => "requirements.txt",
        }
    }

    /// Lock file the resolver requires in frozen mode
    pub fn lock_file(&self) -> Option<&'static str> {
        match self {
            Resolver::Uv => Some("uv.lock"),
            Resolver::Poetry => Some("poetry.lock"),
            Resolver::Pip => None,
        }
    }
}

define_knob_enum! {
    /// Where dependencies are installed
    Isolation {
        /// Dedicated virtual environment, separate from the interpreter's packages
        Venv => "venv" : "virtualenv" | "virtualenv" | "isolated",
        /// The interpreter's own site-packages
        System => "system" : "system site-packages" | "global",
    }
}

define_knob_enum! {
    /// Init process that runs as PID 1 in front of the ASGI server
    Supervisor {
        Tini => "tini" : "tini",
        DumbInit => "dumb-init" : "dumb-init" | "dumb_init" | "dumbinit",
        /// Server runs as PID 1 directly
        Disabled => "none" : "none" | "off" | "disabled",
    }
}

impl Supervisor {
    /// OS package providing the supervisor binary
    pub fn package(&self) -> Option<&'static str> {
        match self {
            Supervisor::Tini => Some("tini"),
            Supervisor::DumbInit => Some("dumb-init"),
            Supervisor::Disabled => None,
        }
    }

    /// Exec-form entrypoint prefix
    pub fn entrypoint(&self) -> Option<Vec<String>> {
        match self {
            Supervisor::Tini => Some(vec!["/usr/bin/tini".to_string(), "--".to_string()]),
            Supervisor::DumbInit => Some(vec!["/usr/bin/dumb-init".to_string(), "--".to_string()]),
            Supervisor::Disabled => None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, Supervisor::Disabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolver_parse_and_aliases() {
        assert_eq!("uv".parse::<Resolver>().unwrap(), Resolver::Uv);
        assert_eq!("POETRY".parse::<Resolver>().unwrap(), Resolver::Poetry);
        assert_eq!("requirements".parse::<Resolver>().unwrap(), Resolver::Pip);
    }

    #[test]
    fn test_invalid_value_lists_options() {
        let err = "conda".parse::<Resolver>().unwrap_err();
        assert!(err.contains("conda"));
        assert!(err.contains("uv, poetry, pip"));
    }

    #[test]
    fn test_supervisor_serialization() {
        assert_eq!(
            serde_json::to_string(&Supervisor::DumbInit).unwrap(),
            "\"dumb-init\""
        );
        assert_eq!(
            serde_json::to_string(&Supervisor::Disabled).unwrap(),
            "\"none\""
        );
        let parsed: Supervisor = serde_json::from_str("\"off\"").unwrap();
        assert_eq!(parsed, Supervisor::Disabled);
    }

    #[test]
    fn test_unknown_value_fails_deserialization() {
        let parsed: Result<Isolation, _> = serde_json::from_str("\"conda\"");
        assert!(parsed.is_err());
    }

    #[test]
    fn test_resolver_files() {
        assert!(Resolver::Uv.is_lockfile_driven());
        assert!(!Resolver::Pip.is_lockfile_driven());
        assert_eq!(Resolver::Poetry.lock_file(), Some("poetry.lock"));
        assert_eq!(Resolver::Pip.manifest_file(), "requirements.txt");
    }

    #[test]
    fn test_supervisor_entrypoint() {
        assert_eq!(
            Supervisor::Tini.entrypoint().unwrap(),
            vec!["/usr/bin/tini", "--"]
        );
        assert!(Supervisor::Disabled.entrypoint().is_none());
        assert!(!Supervisor::Disabled.is_enabled());
    }

    #[test]
    fn test_display_uses_serialized_name() {
        assert_eq!(Isolation::Venv.to_string(), "venv");
        assert_eq!(Isolation::Venv.name(), "virtualenv");
    }
}
