use proptest::prelude::*;
use ccube_sdk::errors::{WorkerError, WorkerErrorExt};
use ccube_sdk::types::{ClassAttributeType, ClassValue, ParameterValue, Parameters};

proptest! {
    #[test]
    fn test_error_user_hint_completeness(message in "\\PC*") {
        let errors = vec![
            WorkerError::Queue(message.clone()),
            WorkerError::Fetch(message.clone()),
            WorkerError::Process(message.clone()),
            WorkerError::Policy(message.clone()),
            WorkerError::Codec(message.clone()),
            WorkerError::InvalidTask(message.clone()),
            WorkerError::Config(message.clone()),
            WorkerError::MissingVariable(message.clone()),
            WorkerError::Persistence(message.clone()),
        ];

        for error in errors {
            // Hints are static operator text, never the raw message
            prop_assert!(!error.user_hint().is_empty());
            prop_assert!(!error.phase().as_str().is_empty());
            prop_assert!(error.to_string().contains(&message));
        }
    }
}

proptest! {
    #[test]
    fn test_integer_parameters_stringify_exactly(value in any::<i64>()) {
        let rendered = ParameterValue::Integer(value).to_string();
        prop_assert_eq!(rendered.parse::<i64>().unwrap(), value);
        prop_assert!(!rendered.contains('.'));
    }

    #[test]
    fn test_real_parameters_stringify_losslessly(value in prop::num::f64::NORMAL) {
        let rendered = ParameterValue::Real(value).to_string();
        prop_assert_eq!(rendered.parse::<f64>().unwrap(), value);
        // A real never reads back as an integer
        prop_assert!(rendered.parse::<i64>().is_err());
    }

    #[test]
    fn test_parameters_to_strings_keeps_every_key(
        entries in prop::collection::btree_map("[a-z_]{1,12}", any::<i64>(), 0..16)
    ) {
        let parameters: Parameters = entries
            .iter()
            .map(|(k, v)| (k.clone(), ParameterValue::Integer(*v)))
            .collect();

        let strings = parameters.to_strings();
        prop_assert_eq!(strings.len(), entries.len());
        for (key, value) in &entries {
            prop_assert_eq!(&strings[key], &value.to_string());
        }
    }

    #[test]
    fn test_integer_labels_accept_real_spelling(value in -1_000_000i64..1_000_000) {
        let class_type = ClassAttributeType::Integer;
        prop_assert_eq!(class_type.parse(&value.to_string()).unwrap(), ClassValue::Integer(value));
        prop_assert_eq!(
            class_type.parse(&format!("{}.0", value)).unwrap(),
            ClassValue::Integer(value)
        );
    }
}
