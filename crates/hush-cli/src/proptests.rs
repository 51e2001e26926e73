//! Property-based tests for the hush CLI

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use crate::config::{CliOverrides, Config};
    use crate::output::{OutputFormat, OutputFormatter};
    use crate::ExitCode;

    fn format_strategy() -> impl Strategy<Value = OutputFormat> {
        prop_oneof![
            Just(OutputFormat::Table),
            Just(OutputFormat::Json),
            Just(OutputFormat::Quiet),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        // Flags always win over file values; absent flags leave them alone.
        #[test]
        fn test_overrides_precedence(
            file_relays in proptest::collection::vec("wss://[a-z]{1,8}\\.relay", 1..4),
            flag_relays in proptest::collection::vec("wss://[a-z]{1,8}\\.relay", 0..4),
            format in proptest::option::of(format_strategy()),
            debug in any::<bool>(),
        ) {
            let mut config = Config::default();
            config.signer.relays = file_relays.clone();

            let overrides = CliOverrides {
                output_format: format.map(|f| f.to_string()),
                debug: debug.then_some(true),
                relay_urls: Some(flag_relays.clone()),
                ..Default::default()
            };
            let config = config.with_overrides(&overrides);

            let expected_relays = if flag_relays.is_empty() { file_relays } else { flag_relays };
            prop_assert_eq!(&config.signer.relays, &expected_relays);
            prop_assert_eq!(
                &config.output.format,
                &format.unwrap_or_default().to_string()
            );
            prop_assert_eq!(config.logging.level == "debug", debug);
            prop_assert!(config.validate().is_ok());
        }

        #[test]
        fn test_output_format_parse_ignores_case(format in format_strategy(), upper in any::<bool>()) {
            let text = if upper { format.to_string().to_uppercase() } else { format.to_string() };
            prop_assert_eq!(text.parse::<OutputFormat>().unwrap(), format);
        }

        // JSON error output stays parseable for any message.
        #[test]
        fn test_json_error_output_is_valid(message in "\\PC{0,80}") {
            let formatter = OutputFormatter::new(OutputFormat::Json, false);
            let out = formatter.format_error_with_code(&message, ExitCode::GeneralError);
            let value: serde_json::Value = serde_json::from_str(&out).unwrap();
            prop_assert_eq!(value["error"].as_str(), Some(message.as_str()));
            prop_assert_eq!(value["exit_code"].as_i64(), Some(1));
        }
    }
}
