//! Macros for declaring storage-labelled enums.

/// Declare a fieldless enum whose variants carry a stable lowercase label.
///
/// The generated type derives the usual value traits, serializes as its
/// label, and gets `as_str`, `FromStr` and `Display` implementations so the
/// same label is used in storage, logs and JSON.
///
/// # Example
///
/// ```
/// use beaconward::label_enum;
///
/// label_enum! {
///     pub enum Signal {
///         Strong => "strong",
///         Weak => "weak",
///     }
/// }
///
/// assert_eq!(Signal::Weak.as_str(), "weak");
/// assert_eq!("strong".parse::<Signal>().unwrap(), Signal::Strong);
/// assert!("loud".parse::<Signal>().is_err());
/// ```
#[macro_export]
macro_rules! label_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $(
                $(#[$variant_meta:meta])*
                $variant:ident => $label:literal
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, serde::Serialize, serde::Deserialize)]
        $vis enum $name {
            $(
                $(#[$variant_meta])*
                #[serde(rename = $label)]
                $variant
            ),*
        }

        impl $name {
            /// Every variant, in declaration order.
            pub const ALL: &'static [$name] = &[$($name::$variant),*];

            /// Stable label used in storage and logs.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $label),*
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::core::UnknownLabel;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($label => Ok(Self::$variant),)*
                    other => Err($crate::core::UnknownLabel {
                        kind: stringify!($name),
                        label: other.to_string(),
                    }),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

#[cfg(test)]
mod tests {
    label_enum! {
        enum TestLabel {
            First => "first",
            SecondThing => "second_thing",
        }
    }

    #[test]
    fn label_enum_generates_labels() {
        assert_eq!(TestLabel::First.as_str(), "first");
        assert_eq!(TestLabel::SecondThing.to_string(), "second_thing");
        assert_eq!(TestLabel::ALL.len(), 2);
    }

    #[test]
    fn label_enum_parses_labels() {
        assert_eq!("first".parse::<TestLabel>(), Ok(TestLabel::First));
        assert_eq!(
            "second_thing".parse::<TestLabel>(),
            Ok(TestLabel::SecondThing)
        );

        let err = "First".parse::<TestLabel>().unwrap_err();
        assert_eq!(err.kind, "TestLabel");
        assert_eq!(err.label, "First");
    }

    #[test]
    fn label_enum_serializes_as_label() {
        let json = serde_json::to_string(&TestLabel::SecondThing).unwrap();
        assert_eq!(json, "\"second_thing\"");

        let back: TestLabel = serde_json::from_str("\"first\"").unwrap();
        assert_eq!(back, TestLabel::First);
    }
}
