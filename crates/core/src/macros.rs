//! Helpers for enums that cross the wire or the database as fixed strings.

/// Implement `as_str`, `Display` and `FromStr` for a fieldless enum with a
/// fixed string per variant.
#[macro_export]
macro_rules! wire_enum {
    ($t:ty { $($variant:ident => $wire:literal),+ $(,)? }) => {
        impl $t {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $wire,)+
                }
            }
        }

        impl ::core::fmt::Display for $t {
            fn fmt(&self, f: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl ::core::str::FromStr for $t {
            type Err = $crate::DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($wire => Ok(Self::$variant),)+
                    other => Err($crate::DomainError::bad_request(format!(
                        concat!("invalid ", stringify!($t), " '{}'"),
                        other
                    ))),
                }
            }
        }
    };
}

#[cfg(test)]
mod tests {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Light {
        On,
        Off,
    }

    wire_enum!(Light { On => "ON", Off => "OFF" });

    #[test]
    fn round_trips_through_strings() {
        assert_eq!(Light::On.as_str(), "ON");
        assert_eq!("OFF".parse::<Light>().unwrap(), Light::Off);
        assert_eq!(Light::Off.to_string(), "OFF");
    }

    #[test]
    fn unknown_string_is_bad_request() {
        let err = "DIM".parse::<Light>().unwrap_err();
        assert_eq!(err.code(), crate::ErrorCode::BadRequest);
        assert!(err.message().contains("Light"));
    }
}
