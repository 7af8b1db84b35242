//! Testing utilities for portcullis
//!
//! - [`fixtures`] - Pre-built configurations, payloads and a wired service
//! - [`mock`] - Mock social provider and callback data
//!
//! ## Usage
//!
//! ```rust,ignore
//! use portcullis::testing::TestFixtures;
//!
//! let auth = TestFixtures::auth();
//! auth.google.set_profile(TestFixtures::google_profile("sub-1", "a@example.com"));
//! ```

pub mod fixtures;
pub mod mock;

pub use fixtures::{TestAuth, TestFixtures};
pub use mock::{MockOAuthCallback, MockSocialProvider};

/// Common test constants
pub mod constants {
    pub const TEST_EMAIL: &str = "test@example.com";

    pub const TEST_USER_NAME: &str = "Test User";

    /// Satisfies the default length policy
    pub const TEST_PASSWORD: &str = "correct-horse-battery";

    pub const TEST_SECRET: &str = "test-session-secret";

    pub const TEST_BASE_URL: &str = "http://localhost:8080";

    pub const TEST_USER_AGENT: &str =
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36";
}
