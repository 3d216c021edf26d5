//! Conversion between argument tuples and wire parameters.
//!
//! Operations take their arguments as a tuple. On the serving side each
//! parameter goes through the coercion chain into the tuple element type; on
//! the calling side each element is encoded into an untyped parameter.
//!
//! ```ignore
//! // caller
//! let sum: i64 = invoker.invoke("Add", (2, 3)).await?;
//!
//! // server
//! ops.register_sync("Add", |_calc: &Calculator, (a, b): (i64, i64)| Ok::<_, Infallible>(a + b));
//! ```

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::codec::{coerce, CoercionError, JsonCodec};
use crate::error::Result;
use crate::protocol::Parameter;

/// Parameters could not be turned into the operation's arguments.
#[derive(Debug, Clone, Error)]
pub enum ArgumentError {
    #[error("expected {expected} argument(s), got {actual}")]
    Count { expected: usize, actual: usize },

    #[error("argument {index}{}: {source}", hint(.type_name))]
    Coerce {
        index: usize,
        type_name: Option<String>,
        #[source]
        source: CoercionError,
    },
}

fn hint(type_name: &Option<String>) -> String {
    match type_name {
        Some(name) => format!(" ({name})"),
        None => String::new(),
    }
}

/// An argument tuple an operation can be invoked with.
pub trait Arguments: Sized + Send + 'static {
    /// Number of parameters expected on the wire.
    const ARITY: usize;

    /// Coerce wire parameters into the tuple.
    fn from_parameters(parameters: Vec<Parameter>) -> std::result::Result<Self, ArgumentError>;
}

/// Something that can be sent as the parameters of a call.
pub trait IntoParameters {
    fn into_parameters(self) -> Result<Vec<Parameter>>;
}

impl IntoParameters for Vec<Parameter> {
    fn into_parameters(self) -> Result<Vec<Parameter>> {
        Ok(self)
    }
}

impl Arguments for () {
    const ARITY: usize = 0;

    fn from_parameters(parameters: Vec<Parameter>) -> std::result::Result<Self, ArgumentError> {
        check_arity(0, parameters.len())
    }
}

impl IntoParameters for () {
    fn into_parameters(self) -> Result<Vec<Parameter>> {
        Ok(Vec::new())
    }
}

fn check_arity(expected: usize, actual: usize) -> std::result::Result<(), ArgumentError> {
    if expected == actual {
        Ok(())
    } else {
        Err(ArgumentError::Count { expected, actual })
    }
}

fn take<T>(
    parameters: &mut std::vec::IntoIter<Parameter>,
    index: usize,
) -> std::result::Result<T, ArgumentError>
where
    T: DeserializeOwned + 'static,
{
    let Parameter { type_name, value } = parameters.next().ok_or(ArgumentError::Count {
        expected: index + 1,
        actual: index,
    })?;
    coerce::<T>(value).map_err(|source| ArgumentError::Coerce {
        index,
        type_name,
        source,
    })
}

macro_rules! impl_arguments {
    ($arity:expr; $($name:ident : $idx:tt),+) => {
        impl<$($name),+> Arguments for ($($name,)+)
        where
            $($name: DeserializeOwned + Send + 'static),+
        {
            const ARITY: usize = $arity;

            fn from_parameters(
                parameters: Vec<Parameter>,
            ) -> std::result::Result<Self, ArgumentError> {
                check_arity(Self::ARITY, parameters.len())?;
                let mut parameters = parameters.into_iter();
                Ok(($(take::<$name>(&mut parameters, $idx)?,)+))
            }
        }

        impl<$($name),+> IntoParameters for ($($name,)+)
        where
            $($name: Serialize),+
        {
            fn into_parameters(self) -> Result<Vec<Parameter>> {
                Ok(vec![$(Parameter::new(JsonCodec::to_value(&self.$idx)?),)+])
            }
        }
    };
}

impl_arguments!(1; A: 0);
impl_arguments!(2; A: 0, B: 1);
impl_arguments!(3; A: 0, B: 1, C: 2);
impl_arguments!(4; A: 0, B: 1, C: 2, D: 3);
impl_arguments!(5; A: 0, B: 1, C: 2, D: 3, E: 4);
impl_arguments!(6; A: 0, B: 1, C: 2, D: 3, E: 4, F: 5);
impl_arguments!(7; A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6);
impl_arguments!(8; A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6, H: 7);
