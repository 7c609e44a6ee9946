pub(crate) fn generate_session_id() -> String {
    let raw = uuid::Uuid::new_v4().simple().to_string();
    format!("order-{}", &raw[..8])
}
