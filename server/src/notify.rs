use crate::model::User;

/// Out-of-band notice sent to a user when someone tries to log in while a
/// session is already active.
pub trait LoginNotifier: Send + Sync {
    fn login_attempt(&self, user: &User);
}

/// Records the notice in the log instead of delivering e-mail.
#[derive(Clone, Default)]
pub struct TracingNotifier;

impl LoginNotifier for TracingNotifier {
    fn login_attempt(&self, user: &User) {
        tracing::warn!(
            user_id = %user.id,
            email = %user.email,
            "login attempt while a session is active; notifying account owner"
        );
    }
}
