use scolaris_core::auth::{generate_api_key, key_prefix};
use serde_json::json;
use uuid::Uuid;

/// Generate a fresh API key offline.
///
/// Only the hash is meant to be stored. With `user_id`, the output also
/// carries the `INSERT` that registers the key for that user.
pub fn generate(user_id: Option<Uuid>, label: Option<&str>) -> i32 {
    let (api_key, key_hash) = generate_api_key();
    let prefix = key_prefix(&api_key);

    let mut output = json!({
        "api_key": api_key,
        "key_hash": key_hash,
        "key_prefix": prefix,
    });
    if let Some(user_id) = user_id {
        output["sql"] = json!(insert_statement(
            Uuid::now_v7(),
            user_id,
            &key_hash,
            &prefix,
            label
        ));
    }

    match serde_json::to_string_pretty(&output) {
        Ok(text) => {
            println!("{text}");
            0
        }
        Err(e) => {
            eprintln!("{e}");
            2
        }
    }
}

fn insert_statement(
    key_id: Uuid,
    user_id: Uuid,
    key_hash: &str,
    prefix: &str,
    label: Option<&str>,
) -> String {
    let label = label
        .map(|l| format!("'{}'", l.replace('\'', "''")))
        .unwrap_or_else(|| "NULL".to_string());
    format!(
        "INSERT INTO api_keys (id, user_id, key_hash, key_prefix, label) \
         VALUES ('{key_id}', '{user_id}', '{key_hash}', '{prefix}', {label});"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_statement_quotes_label() {
        let key_id = Uuid::nil();
        let user_id = Uuid::nil();
        let sql = insert_statement(key_id, user_id, "abc", "0123abcd", Some("poste d'accueil"));
        assert!(sql.contains("'poste d''accueil'"));
        assert!(sql.contains("'0123abcd'"));
        assert!(sql.ends_with(");"));
    }

    #[test]
    fn insert_statement_without_label_uses_null() {
        let sql = insert_statement(Uuid::nil(), Uuid::nil(), "abc", "0123abcd", None);
        assert!(sql.contains(", NULL);"));
    }
}
