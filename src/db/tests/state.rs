use crate::db::*;
use tempfile::NamedTempFile;

#[tokio::test]
async fn test_shutdown_state_initial() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    let was_unclean = db.was_unclean_shutdown().await.unwrap();
    assert!(was_unclean, "Initial state should indicate unclean shutdown");

    db.close().await;
}

#[tokio::test]
async fn test_shutdown_state_clean_lifecycle() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    db.set_clean_start().await.unwrap();
    assert!(
        db.was_unclean_shutdown().await.unwrap(),
        "After clean start, should still indicate unclean (not yet shut down)"
    );

    db.set_clean_shutdown().await.unwrap();
    assert!(
        !db.was_unclean_shutdown().await.unwrap(),
        "After clean shutdown, should indicate clean"
    );

    db.close().await;
}

#[tokio::test]
async fn test_shutdown_state_unclean_detection() {
    let temp_file = NamedTempFile::new().unwrap();

    // First session starts but never shuts down cleanly
    {
        let db = Database::new(temp_file.path()).await.unwrap();
        db.set_clean_start().await.unwrap();
        db.close().await;
    }

    {
        let db = Database::new(temp_file.path()).await.unwrap();
        assert!(
            db.was_unclean_shutdown().await.unwrap(),
            "Should detect unclean shutdown from previous session"
        );
        db.close().await;
    }
}
