//! Macro for defining typed UUID identifiers.

/// Defines a newtype wrapper around [`uuid::Uuid`] with:
///
/// - `new()` to generate a fresh random (v4) identifier
/// - `parse()` with strict validation
/// - `Display`, `FromStr`, `Serialize`, and `Deserialize` implementations
/// - `Copy`, `Ord`, `Hash`, and the other standard derives
///
/// # Example
///
/// ```ignore
/// define_uuid!(ClientUuid);
///
/// let id = ClientUuid::new();
/// let parsed: ClientUuid = id.to_string().parse()?;
/// assert_eq!(id, parsed);
/// ```
#[macro_export]
macro_rules! define_uuid {
    ($name:ident) => {
        /// A typed UUID for this resource type.
        #[derive(
            Debug,
            Clone,
            Copy,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            Hash,
            serde::Serialize,
            serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name($crate::Uuid);

        impl $name {
            /// Creates a new identifier with a fresh random UUID.
            #[must_use]
            pub fn new() -> Self {
                Self($crate::Uuid::new_v4())
            }

            /// Creates an identifier from a raw UUID.
            #[must_use]
            pub const fn from_uuid(uuid: $crate::Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the underlying UUID.
            #[must_use]
            pub const fn as_uuid(&self) -> $crate::Uuid {
                self.0
            }

            /// Parses an identifier from its canonical string form.
            pub fn parse(s: &str) -> Result<Self, $crate::IdentityError> {
                if s.is_empty() {
                    return Err($crate::IdentityError::Empty);
                }

                let uuid = s
                    .parse::<$crate::Uuid>()
                    .map_err(|e| $crate::IdentityError::Malformed(e.to_string()))?;

                Ok(Self(uuid))
            }

            /// Returns the first eight hex digits, for compact display.
            #[must_use]
            pub fn short(&self) -> String {
                self.0.simple().to_string()[..8].to_string()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::IdentityError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl AsRef<$crate::Uuid> for $name {
            fn as_ref(&self) -> &$crate::Uuid {
                &self.0
            }
        }
    };
}
