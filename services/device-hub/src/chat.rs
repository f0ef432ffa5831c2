/// Reply for the `/chat` endpoint. Echo only; no model is wired in behind it.
pub fn process_message(message: &str) -> String {
    format!("You said: {message}")
}
