use envkit::core::env::Environment;
use envkit::core::users::{KnownUser, UserRecord};
use std::sync::Arc;
use std::thread;
use tempfile::{TempDir, tempdir};

fn setup() -> (TempDir, Environment, Vec<KnownUser>) {
    let tmp = tempdir().unwrap();
    let env = Environment::create(tmp.path().join("env")).unwrap();
    let users = vec![
        UserRecord::new("123", None, Some("a@example.com"), false),
        UserRecord::new("jane", Some("Jane"), None, true),
        UserRecord::new("joe", None, Some("joe@example.com"), true),
        UserRecord::new("tom", Some("Tom"), Some("tom@example.com"), true),
    ];
    env.insert_users(&users).unwrap();
    let expected = users
        .into_iter()
        .filter(|u| u.active)
        .map(known)
        .collect();
    (tmp, env, expected)
}

fn known(record: UserRecord) -> KnownUser {
    KnownUser {
        username: record.username,
        display_name: record.display_name,
        email: record.email,
    }
}

fn user4() -> UserRecord {
    UserRecord::new("user4", Some("User Four"), Some("user4@example.net"), true)
}

#[test]
fn known_users_as_list() {
    let (_tmp, env, expected) = setup();
    let view = env.get_known_users().unwrap();
    assert_eq!(view.users(), expected.as_slice());
}

#[test]
fn known_users_as_map() {
    let (_tmp, env, expected) = setup();
    let view = env.get_known_users().unwrap();
    let map = view.as_map();
    assert_eq!(map.len(), 3);
    for user in &expected {
        assert_eq!(
            map.get(&user.username),
            Some(&(user.display_name.clone(), user.email.clone()))
        );
    }
    assert!(!map.contains_key("123"));
}

#[test]
fn known_users_are_cached() {
    let (_tmp, env, expected) = setup();
    let first = env.get_known_users().unwrap();
    env.insert_users(&[UserRecord::new("user4", None, None, true)])
        .unwrap();

    let again = env.get_known_users().unwrap();
    assert!(Arc::ptr_eq(&first, &again));
    assert_eq!(again.users(), expected.as_slice());
    assert_eq!(again.as_map().len(), 3);
    assert!(!again.as_map().contains_key("user4"));
}

#[test]
fn invalidate_refreshes_both_shapes() {
    let (_tmp, env, mut expected) = setup();
    let before = env.get_known_users().unwrap();
    env.insert_users(&[user4()]).unwrap();
    expected.push(known(user4()));

    env.invalidate_known_users_cache();
    let map_first = env.get_known_users().unwrap();
    assert_eq!(map_first.as_map().len(), 4);
    assert!(map_first.as_map().contains_key("user4"));

    let list_after = env.get_known_users().unwrap();
    assert_eq!(list_after.users(), expected.as_slice());
    assert_eq!(list_after.generation(), map_first.generation());
    assert!(list_after.generation() > before.generation());
}

#[test]
fn inactive_users_never_appear() {
    let (_tmp, env, _) = setup();
    env.insert_users(&[UserRecord::new("jane", Some("Jane"), None, false)])
        .unwrap();
    env.invalidate_known_users_cache();

    let view = env.get_known_users().unwrap();
    let names: Vec<&str> = view.users().iter().map(|u| u.username.as_str()).collect();
    assert_eq!(names, vec!["joe", "tom"]);
}

#[test]
fn concurrent_readers_see_consistent_generations() {
    let (_tmp, env, _) = setup();
    let env = Arc::new(env);
    env.insert_users(&[user4()]).unwrap();

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let env = Arc::clone(&env);
            thread::spawn(move || {
                for _ in 0..20 {
                    let view = env.get_known_users().unwrap();
                    assert_eq!(view.users().len(), view.as_map().len());
                    assert_eq!(view.len(), 4);
                }
            })
        })
        .collect();
    for _ in 0..10 {
        env.invalidate_known_users_cache();
    }
    for reader in readers {
        reader.join().unwrap();
    }

    let view = env.get_known_users().unwrap();
    assert_eq!(view.generation(), 10);
}
