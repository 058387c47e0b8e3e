//! The external collaborator that converts between wire text and the opaque
//! [`Adaptable`] shape, and between an [`Adaptable`] and a domain signal.
//!
//! Exposed as a capability trait behind dynamic dispatch, per the design
//! note that the core never names a concrete adapter implementor: the
//! concrete JSON protocol adapter (entity/feature/policy schema) lives
//! entirely outside this crate.

use std::fmt::Debug;

use crate::adaptable::Adaptable;
use crate::errors::ProtocolError;

/// A domain-level message the session engine sends and receives without
/// understanding its contents. The concrete domain model (things, policies,
/// features) is out of scope for this crate; `Signal` is the seam it plugs
/// in through.
pub trait Signal: Debug + Send + Sync {
    /// The correlation id already attached to this signal, if any.
    fn correlation_id(&self) -> Option<&str>;

    /// A stable name identifying which concrete signal type this is,
    /// compared against a handle's declared `success_type`/`error_type`.
    fn type_name(&self) -> &str;
}

/// Converts between wire text, the opaque [`Adaptable`] shape, and domain
/// signals. The core treats every method as fallible and opaque; it never
/// inspects the payload beyond what [`Adaptable`] already exposes.
pub trait ProtocolAdapter: Send + Sync {
    /// Convert a domain signal into its adaptable form before serialising.
    fn to_adaptable(&self, signal: &dyn Signal) -> Result<Adaptable, ProtocolError>;

    /// Convert an adaptable received over the wire back into a domain
    /// signal.
    fn from_adaptable(&self, adaptable: &Adaptable) -> Result<Box<dyn Signal>, ProtocolError>;

    /// Serialise an adaptable to the JSON text that goes out over the wire.
    fn to_json_string(&self, adaptable: &Adaptable) -> Result<String, ProtocolError>;

    /// Parse inbound wire text into an adaptable.
    fn parse(&self, text: &str) -> Result<Adaptable, ProtocolError>;
}
