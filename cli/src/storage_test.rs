use super::*;
use registro::session::{TOKEN_KEY, USER_KEY};

fn temp_path(dir: &tempfile::TempDir) -> PathBuf {
    dir.path().join("nested").join("session.json")
}

#[test]
fn missing_file_is_empty_session() {
    let dir = tempfile::tempdir().unwrap();
    let storage = FileSessionStorage::open(temp_path(&dir));
    assert_eq!(storage.get(TOKEN_KEY), None);
}

#[test]
fn writes_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = temp_path(&dir);
    {
        let storage = FileSessionStorage::open(&path);
        storage.set(TOKEN_KEY, "tok1").unwrap();
        storage.set(USER_KEY, r#"{"id":2,"role":"admin"}"#).unwrap();
    }

    let reopened = FileSessionStorage::open(&path);
    assert_eq!(reopened.get(TOKEN_KEY).as_deref(), Some("tok1"));
    assert_eq!(reopened.get(USER_KEY).as_deref(), Some(r#"{"id":2,"role":"admin"}"#));
}

#[test]
fn clearing_both_keys_deletes_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = temp_path(&dir);
    let storage = FileSessionStorage::open(&path);
    storage.set(TOKEN_KEY, "tok1").unwrap();
    storage.remove(TOKEN_KEY).unwrap();
    storage.remove(USER_KEY).unwrap();
    assert!(!path.exists());
}

#[test]
fn corrupt_file_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.json");
    fs::write(&path, "not json").unwrap();

    let storage = FileSessionStorage::open(&path);
    assert_eq!(storage.get(TOKEN_KEY), None);

    storage.set(TOKEN_KEY, "fresh").unwrap();
    assert_eq!(FileSessionStorage::open(&path).get(TOKEN_KEY).as_deref(), Some("fresh"));
}

#[cfg(unix)]
#[test]
fn session_file_is_owner_only() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let path = temp_path(&dir);
    FileSessionStorage::open(&path).set(TOKEN_KEY, "tok1").unwrap();
    let mode = fs::metadata(&path).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o600);
}

#[test]
fn hydrates_a_session_context() {
    let dir = tempfile::tempdir().unwrap();
    let path = temp_path(&dir);
    let storage = FileSessionStorage::open(&path);
    storage.set(TOKEN_KEY, "tok1").unwrap();
    storage.set(USER_KEY, r#"{"username":"ana","rol":"gestor"}"#).unwrap();

    let session = registro::SessionContext::hydrate(std::sync::Arc::new(FileSessionStorage::open(&path)));
    assert!(session.is_authenticated());
    assert_eq!(session.user().unwrap().role, registro::Role::Gestor);

    session.invalidate();
    assert!(!path.exists());
}
