use std::sync::Arc;

use proptest::prelude::*;
use surround_store::{InMemoryObjectClient, LocalDriver, ObjectClient, ObjectStoreDriver, PushSource, StorageDriver};

fn key() -> impl Strategy<Value = String> {
    prop::collection::vec("[a-z0-9_]{1,8}", 1..4).prop_map(|segments| segments.join("/"))
}

fn assert_round_trip(driver: &dyn StorageDriver, key: &str, payload: &[u8]) -> Result<(), TestCaseError> {
    driver
        .push(key, PushSource::Bytes(payload), true)
        .map_err(|err| TestCaseError::fail(err.to_string()))?;
    prop_assert!(driver.exists(key));
    let pulled = driver.pull(key).map_err(|err| TestCaseError::fail(err.to_string()))?;
    prop_assert_eq!(pulled, payload.to_vec());
    let files = driver
        .get_files(None)
        .map_err(|err| TestCaseError::fail(err.to_string()))?;
    prop_assert!(files.contains(&key.to_string()), "{:?}", files);
    Ok(())
}

proptest! {
    #[test]
    fn local_driver_keeps_bytes(key in key(), payload in prop::collection::vec(any::<u8>(), 0..512)) {
        let dir = tempfile::tempdir().expect("tmp");
        let driver = LocalDriver::new(dir.path()).expect("driver");
        assert_round_trip(&driver, &key, &payload)?;
    }

    #[test]
    fn object_driver_keeps_bytes(key in key(), payload in prop::collection::vec(any::<u8>(), 0..512)) {
        let client: Arc<dyn ObjectClient> = Arc::new(InMemoryObjectClient::new());
        let driver = ObjectStoreDriver::new("mem://bucket/prefix", client).expect("driver");
        assert_round_trip(&driver, &key, &payload)?;
    }
}
