//! Verify request building and decoding against JSON test vectors stored in
//! `test-vectors/`.
//!
//! Comparing parsed JSON (not raw strings) avoids false negatives from
//! field-ordering differences.

use intentions_core::{
    decode, CreateItem, FetchCoordinator, FetchError, HttpMethod, Item, ItemsClient,
    TransportConfig,
};
use serde_json::Value;

fn parse_method(s: &str) -> HttpMethod {
    match s {
        "GET" => HttpMethod::Get,
        "POST" => HttpMethod::Post,
        "PUT" => HttpMethod::Put,
        "PATCH" => HttpMethod::Patch,
        "DELETE" => HttpMethod::Delete,
        "HEAD" => HttpMethod::Head,
        other => panic!("unknown method: {other}"),
    }
}

/// Decode `payload` as the vector's target type and re-encode the result,
/// so both targets compare as `serde_json::Value`.
fn decode_target(target: &str, payload: &[u8]) -> Result<Value, FetchError> {
    match target {
        "item" => decode::<Item>(payload).map(|item| serde_json::to_value(item).unwrap()),
        "items" => decode::<Vec<Item>>(payload).map(|items| serde_json::to_value(items).unwrap()),
        other => panic!("unknown target: {other}"),
    }
}

#[test]
fn decode_test_vectors() {
    let raw = include_str!("../../test-vectors/decode.json");
    let vectors: Value = serde_json::from_str(raw).unwrap();

    for case in vectors["cases"].as_array().unwrap() {
        let name = case["name"].as_str().unwrap();
        let target = case["target"].as_str().unwrap();
        let payload = case["payload"].as_str().unwrap();
        let expected = &case["expected"];

        let result = decode_target(target, payload.as_bytes());

        if let Some(ok) = expected.get("ok") {
            let value = result.unwrap_or_else(|err| panic!("{name}: unexpected error {err}"));
            assert_eq!(&value, ok, "{name}: decoded value");
            continue;
        }

        let expected_err = &expected["error"];
        let err = match result {
            Err(err) => err,
            Ok(value) => panic!("{name}: expected an error, decoded {value}"),
        };
        let FetchError::Decode { field, offset, .. } = &err else {
            panic!("{name}: expected a decode error, got {err:?}");
        };
        assert_eq!(
            field.as_deref(),
            expected_err["field"].as_str(),
            "{name}: field"
        );
        assert_eq!(
            offset.is_some(),
            expected_err["has_offset"].as_bool().unwrap(),
            "{name}: offset {offset:?}"
        );
        if let Some(offset) = offset {
            assert!(*offset <= payload.len(), "{name}: offset out of range");
        }
    }
}

#[test]
fn request_test_vectors() {
    let raw = include_str!("../../test-vectors/requests.json");
    let vectors: Value = serde_json::from_str(raw).unwrap();
    let base_url = vectors["base_url"].as_str().unwrap();

    let coordinator = FetchCoordinator::http(&TransportConfig::default()).unwrap();
    let client = ItemsClient::new(base_url, coordinator);

    for case in vectors["cases"].as_array().unwrap() {
        let name = case["name"].as_str().unwrap();
        let expected = &case["expected_request"];

        let req = match case["operation"].as_str().unwrap() {
            "list" => client.build_list_items(),
            "get" => client.build_get_item(case["id"].as_u64().unwrap()),
            "create" => {
                let input: CreateItem = serde_json::from_value(case["input"].clone()).unwrap();
                client.build_create_item(&input)
            }
            other => panic!("unknown operation: {other}"),
        }
        .unwrap();

        assert_eq!(
            req.method(),
            parse_method(expected["method"].as_str().unwrap()),
            "{name}: method"
        );
        assert_eq!(
            req.url().as_str(),
            format!("{base_url}{}", expected["path"].as_str().unwrap()),
            "{name}: url"
        );

        let expected_headers: Vec<(String, String)> =
            serde_json::from_value(expected["headers"].clone()).unwrap();
        assert_eq!(req.headers(), expected_headers.as_slice(), "{name}: headers");

        let body: Option<Value> = req
            .body_bytes()
            .map(|bytes| serde_json::from_slice(bytes).unwrap());
        let expected_body = match &expected["body"] {
            Value::Null => None,
            other => Some(other.clone()),
        };
        assert_eq!(body, expected_body, "{name}: body");
    }
}
