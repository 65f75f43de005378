//! Typed identifier definitions.

use crate::define_uuid;

define_uuid!(ClientUuid);
define_uuid!(ImageUuid);
define_uuid!(InstanceUuid);
