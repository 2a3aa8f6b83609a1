use crate::models::AccountInfo;
use serde::Deserialize;

pub(crate) const TOKEN_KEY: &str = "lesson_notes_token";
pub(crate) const USER_KEY: &str = "lesson_notes_user";

fn local_storage() -> Option<web_sys::Storage> {
    web_sys::window().and_then(|w| w.local_storage().ok().flatten())
}

pub(crate) fn load_token_from_storage() -> Option<String> {
    local_storage()?.get_item(TOKEN_KEY).ok().flatten()
}

pub(crate) fn load_json_from_storage<T: for<'de> Deserialize<'de>>(key: &str) -> Option<T> {
    let json = local_storage()?.get_item(key).ok().flatten()?;
    serde_json::from_str(&json).ok()
}

/// Signed-in user as written by the auth flow.
pub(crate) fn load_user_from_storage() -> Option<AccountInfo> {
    load_json_from_storage(USER_KEY)
}

#[cfg(all(test, target_arch = "wasm32"))]
mod wasm_tests {
    use super::*;
    use wasm_bindgen_test::*;

    wasm_bindgen_test_configure!(run_in_browser);

    #[wasm_bindgen_test]
    fn test_user_storage_roundtrip() {
        let storage = local_storage().expect("localStorage");
        storage
            .set_item(USER_KEY, r#"{"id":"u1","username":"u"}"#)
            .expect("set_item");

        let loaded = load_user_from_storage().expect("should load user from localStorage");
        assert_eq!(loaded.id, "u1");

        storage.remove_item(USER_KEY).expect("remove_item");
        assert!(load_user_from_storage().is_none());
    }
}
