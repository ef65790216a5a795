// src/storage/tests/mod.rs


// Common utilities for storage tests
//
// Every helper takes a namespace so runs against a shared Redis do not collide.
pub(crate) mod common {
    use std::time::Duration;
    use tokio::time;

    use crate::error::Result;
    use crate::storage::{Reply, StorageBackend, StoragePipeline, StoreTransaction};

    // Test basic storage operations that should work on any backend
    pub async fn test_basic_operations<S: StorageBackend>(storage: &S, ns: &str) -> Result<()> {
        let key = format!("{}:basic", ns);
        let value: &[u8] = b"test_value";

        storage.set(&key, value, None).await?;
        assert_eq!(storage.get(&key).await?.as_deref(), Some(value));

        // Counters are decimal text, like INCRBY
        let counter_key = format!("{}:counter", ns);
        assert_eq!(storage.increment(&counter_key, 1).await?, 1);
        assert_eq!(storage.increment(&counter_key, 3).await?, 4);
        assert_eq!(storage.decrement(&counter_key, 6).await?, -2);
        assert_eq!(storage.get(&counter_key).await?, Some(b"-2".to_vec()));

        assert!(storage.exists(&key).await?);
        assert!(storage.exists(&counter_key).await?);
        assert!(!storage.exists(&format!("{}:missing", ns)).await?);
        assert_eq!(storage.get(&format!("{}:missing", ns)).await?, None);

        assert!(storage.delete(&key).await?);
        assert!(!storage.delete(&key).await?);
        assert!(!storage.exists(&key).await?);

        storage.delete(&counter_key).await?;
        Ok(())
    }

    pub async fn test_get_set<S: StorageBackend>(storage: &S, ns: &str) -> Result<()> {
        let key = format!("{}:getset", ns);

        assert_eq!(storage.get_set(&key, b"1").await?, None);
        assert_eq!(storage.get_set(&key, b"2").await?, Some(b"1".to_vec()));
        assert_eq!(storage.get(&key).await?, Some(b"2".to_vec()));

        storage.delete(&key).await?;
        Ok(())
    }

    // Test expiration functionality that should work on any backend
    pub async fn test_key_expiration<S: StorageBackend>(storage: &S, ns: &str) -> Result<()> {
        let key = format!("{}:expiring", ns);

        storage
            .set(&key, b"expiring_value", Some(Duration::from_millis(100)))
            .await?;
        assert!(storage.exists(&key).await?);

        time::sleep(Duration::from_millis(200)).await;
        assert!(!storage.exists(&key).await?);
        assert_eq!(storage.get(&key).await?, None);

        // Explicit expire on an existing key
        let key2 = format!("{}:expire_method", ns);
        storage.set(&key2, b"value", None).await?;
        assert!(storage.expire(&key2, Duration::from_millis(100)).await?);
        assert!(storage.exists(&key2).await?);

        time::sleep(Duration::from_millis(200)).await;
        assert!(!storage.exists(&key2).await?);

        // Expire on a missing key reports false
        assert!(!storage.expire(&key2, Duration::from_secs(1)).await?);

        Ok(())
    }

    // Test pipeline operations that should work on any backend
    pub async fn test_pipeline_operations<S: StorageBackend>(storage: &S, ns: &str) -> Result<()> {
        let key1 = format!("{}:pipe1", ns);
        let key2 = format!("{}:pipe2", ns);
        let counter = format!("{}:pipe_counter", ns);

        let mut pipeline = storage.pipeline();
        pipeline
            .set(&key1, b"value1", None)
            .set(&key2, b"value2", None)
            .get(&key1)
            .increment(&counter, 5)
            .expire(&key1, Duration::from_secs(60))
            .delete(&key2);

        let results = storage.execute_pipeline(pipeline).await?;

        assert_eq!(results.len(), 6);
        assert_eq!(results[2], Reply::Data(b"value1".to_vec()));
        assert_eq!(results[3].as_integer(), Some(5));
        assert_eq!(results[5].as_integer(), Some(1));

        assert!(storage.exists(&key1).await?);
        assert!(!storage.exists(&key2).await?);
        assert_eq!(storage.get(&counter).await?, Some(b"5".to_vec()));

        storage.delete(&key1).await?;
        storage.delete(&counter).await?;
        Ok(())
    }

    pub async fn test_set_operations<S: StorageBackend>(storage: &S, ns: &str) -> Result<()> {
        let key = format!("{}:members", ns);

        assert!(storage.set_add(&key, b"a").await?);
        assert!(storage.set_add(&key, b"b").await?);
        assert!(!storage.set_add(&key, b"a").await?);

        let mut members = storage.set_members(&key).await?;
        members.sort();
        assert_eq!(members, vec![b"a".to_vec(), b"b".to_vec()]);

        assert!(storage.set_remove(&key, b"a").await?);
        assert!(!storage.set_remove(&key, b"a").await?);
        assert!(storage.set_remove(&key, b"b").await?);

        // The set disappears with its last member
        assert!(!storage.exists(&key).await?);
        assert!(storage.set_members(&key).await?.is_empty());

        Ok(())
    }

    // Watch, read, queue, exec with nobody else around
    pub async fn test_transaction_commits<S: StorageBackend>(storage: &S, ns: &str) -> Result<()> {
        let key = format!("{}:tx_commit", ns);
        storage.set(&key, b"10", None).await?;

        let mut tx = storage.watch(&[key.as_str()]).await?;
        assert_eq!(tx.get(&key).await?, Some(b"10".to_vec()));
        let mut pipeline = tx.multi();
        pipeline.set(&key, b"20", None);
        let replies = tx.exec(pipeline).await?;

        assert!(replies.is_some());
        assert_eq!(storage.get(&key).await?, Some(b"20".to_vec()));

        storage.delete(&key).await?;
        Ok(())
    }

    // A write from outside the transaction makes EXEC apply nothing
    pub async fn test_transaction_aborts_on_conflict<S: StorageBackend>(
        storage: &S,
        ns: &str,
    ) -> Result<()> {
        let key = format!("{}:tx_conflict", ns);
        storage.set(&key, b"10", None).await?;

        let mut tx = storage.watch(&[key.as_str()]).await?;
        assert_eq!(tx.get(&key).await?, Some(b"10".to_vec()));

        storage.increment(&key, 1).await?;

        let mut pipeline = tx.multi();
        pipeline.set(&key, b"20", None);
        assert_eq!(tx.exec(pipeline).await?, None);
        assert_eq!(storage.get(&key).await?, Some(b"11".to_vec()));

        // Deleting a watched key counts as a modification too
        let mut tx = storage.watch(&[key.as_str()]).await?;
        storage.delete(&key).await?;
        let mut pipeline = tx.multi();
        pipeline.increment(&key, 1);
        assert_eq!(tx.exec(pipeline).await?, None);
        assert!(!storage.exists(&key).await?);

        Ok(())
    }

    pub async fn test_transaction_discard<S: StorageBackend>(storage: &S, ns: &str) -> Result<()> {
        let key = format!("{}:tx_discard", ns);
        storage.set(&key, b"1", None).await?;

        let tx = storage.watch(&[key.as_str()]).await?;
        tx.discard().await?;
        assert_eq!(storage.get(&key).await?, Some(b"1".to_vec()));

        // Watching an absent key and creating it in the transaction commits
        let fresh = format!("{}:tx_fresh", ns);
        let mut tx = storage.watch(&[fresh.as_str()]).await?;
        assert_eq!(tx.get(&fresh).await?, None);
        let mut pipeline = tx.multi();
        pipeline.increment(&fresh, 7);
        let replies = tx.exec(pipeline).await?.expect("nothing touched the key");
        assert_eq!(replies[0].as_integer(), Some(7));

        storage.delete(&key).await?;
        storage.delete(&fresh).await?;
        Ok(())
    }

    pub async fn test_integer_errors<S: StorageBackend>(storage: &S, ns: &str) -> Result<()> {
        let text = format!("{}:text", ns);
        storage.set(&text, b"hello", None).await?;
        assert!(storage.increment(&text, 1).await.is_err());
        assert_eq!(storage.get(&text).await?, Some(b"hello".to_vec()));

        let big = format!("{}:big", ns);
        storage.set(&big, i64::MAX.to_string().as_bytes(), None).await?;
        assert!(storage.increment(&big, 1).await.is_err());
        assert_eq!(storage.get(&big).await?, Some(i64::MAX.to_string().into_bytes()));

        storage.delete(&text).await?;
        storage.delete(&big).await?;
        Ok(())
    }

    // A failing command inside EXEC leaves an error in its slot and the rest still apply
    pub async fn test_transaction_keeps_going_after_failed_command<S: StorageBackend>(
        storage: &S,
        ns: &str,
    ) -> Result<()> {
        let first = format!("{}:tx_first", ns);
        let text = format!("{}:tx_text", ns);
        let last = format!("{}:tx_last", ns);
        storage.set(&text, b"hello", None).await?;

        let tx = storage.watch(&[first.as_str()]).await?;
        let mut pipeline = tx.multi();
        pipeline
            .set(&first, b"1", None)
            .increment(&text, 1)
            .set(&last, b"3", None);

        match tx.exec(pipeline).await {
            Ok(Some(replies)) => {
                assert_eq!(replies.len(), 3);
                assert_eq!(replies[0], Reply::Status("OK".to_string()));
                assert!(replies[1].as_error().is_some(), "{:?}", replies[1]);
                assert_eq!(replies[2], Reply::Status("OK".to_string()));
            }
            Ok(None) => panic!("nothing touched the watched key"),
            Err(e) => assert!(e.is_command_error(), "{:?}", e),
        }

        assert_eq!(storage.get(&first).await?, Some(b"1".to_vec()));
        assert_eq!(storage.get(&text).await?, Some(b"hello".to_vec()));
        assert_eq!(storage.get(&last).await?, Some(b"3".to_vec()));

        storage.delete(&first).await?;
        storage.delete(&text).await?;
        storage.delete(&last).await?;
        Ok(())
    }

    pub async fn test_pipeline_keeps_going_after_failed_command<S: StorageBackend>(
        storage: &S,
        ns: &str,
    ) -> Result<()> {
        let first = format!("{}:pipe_first", ns);
        let big = format!("{}:pipe_big", ns);
        let last = format!("{}:pipe_last", ns);
        storage.set(&big, i64::MAX.to_string().as_bytes(), None).await?;

        let mut pipeline = storage.pipeline();
        pipeline
            .increment(&first, 5)
            .increment(&big, 1)
            .set_add(&last, b"member");

        match storage.execute_pipeline(pipeline).await {
            Ok(replies) => {
                assert_eq!(replies.len(), 3);
                assert_eq!(replies[0].as_integer(), Some(5));
                assert!(replies[1].as_error().is_some(), "{:?}", replies[1]);
                assert_eq!(replies[2].as_integer(), Some(1));
            }
            Err(e) => assert!(e.is_command_error(), "{:?}", e),
        }

        assert_eq!(storage.get(&first).await?, Some(b"5".to_vec()));
        assert_eq!(storage.get(&big).await?, Some(i64::MAX.to_string().into_bytes()));
        assert_eq!(storage.set_members(&last).await?, vec![b"member".to_vec()]);

        storage.delete(&first).await?;
        storage.delete(&big).await?;
        storage.delete(&last).await?;
        Ok(())
    }
}
