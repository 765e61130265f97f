/// Capability invoked for each message delivered to an application.
///
/// Implementations run on the task that owns the connection (the client
/// reader, or the broadcasting session in combo mode while the registry lock
/// is held). They should hand the text off to another task instead of doing
/// slow work inline, and must not call back into the relay synchronously.
pub trait MessageReceiver: Send + Sync {
    fn receive_message(&self, text: &str);
}

impl<F> MessageReceiver for F
where
    F: Fn(&str) + Send + Sync,
{
    fn receive_message(&self, text: &str) {
        self(text)
    }
}
