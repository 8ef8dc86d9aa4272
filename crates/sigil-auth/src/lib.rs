//! SIGIL Auth — crypto primitives, the OTP engine, the token engine,
//! the WebAuthn adapter, and the flow orchestrators that drive the
//! credential and session lifecycle.

pub mod config;
pub mod crypto;
pub mod flows;
pub mod otp;
pub mod token;
pub mod webauthn;

pub use config::{PolicyConfig, TokenConfig, WebAuthnConfig};
pub use flows::{
    DeviceService, LoginRequest, LoginService, MfaUpdate, MfaUpdateOutcome, SessionPayload,
    SignUpRequest, SignUpService, TokenFlowService, TotpEnrollment, UserService,
};
pub use otp::OtpEnvelope;
pub use token::{CLIENT_ID_COOKIE, Cookie, Minted, RefreshEnvelope, TokenOptions, TokenService};
pub use webauthn::WebAuthnService;
