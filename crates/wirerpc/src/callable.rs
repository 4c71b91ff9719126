//! # Callables
//!
//! A `Callable` turns argument bytes into result bytes. Most are built from
//! plain Rust closures or methods through the adapters in this module, which
//! decode each parameter in order, reject missing or leftover argument bytes,
//! and encode the return value:
//!
//! ```ignore
//! let add = callable::function(|a: i32, b: i32| a + b);
//! let div = callable::fallible(|a: i32, b: i32| {
//!     if b == 0 { Err(CallError::business(1, "divide by zero")) } else { Ok(a / b) }
//! });
//! ```
//!
//! Adapters exist for zero to six parameters. A panic inside user code is
//! caught and reported as an internal error instead of tearing down the
//! connection task.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use wirepack::Decoder;
use wirepack::Encoder;
use wirepack::Pack;
use wirepack::Unpack;

use crate::error::CallError;
use crate::handles::ConnectionId;
use crate::handles::CorrelationId;
use crate::handles::FunctionId;
use crate::handles::ProtocolId;

/// Who is calling, and what they asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallContext {
    pub connection: ConnectionId,
    pub protocol: ProtocolId,
    pub function: FunctionId,
    pub correlation: CorrelationId,
}

impl CallContext {
    /// Context for an in-process invocation with no connection behind it.
    pub fn local(protocol: ProtocolId, function: FunctionId) -> Self {
        Self { connection: ConnectionId::default(), protocol, function, correlation: 0 }
    }
}

pub trait Callable: Send + Sync {
    /// Decodes `params`, runs, and returns the encoded result.
    fn invoke(&self, ctx: &CallContext, params: &[u8]) -> Result<Vec<u8>, CallError>;

    /// Number of parameters this callable decodes.
    fn arity(&self) -> usize;
}

/// Outbound argument lists. `()` sends no arguments at all.
pub trait Arguments {
    const COUNT: usize;

    fn pack_args(&self, enc: &mut Encoder) -> wirepack::Result<()>;
}

/// Encodes an argument tuple into the bytes a `Call` envelope carries.
pub fn pack_arguments<A: Arguments>(args: &A) -> Result<Vec<u8>, CallError> {
    let mut enc = Encoder::new();
    args.pack_args(&mut enc)
        .and_then(|_| enc.into_bytes())
        .map_err(|e| CallError::internal(format!("could not encode arguments: {}", e)))
}

/// Plain functions and closures, `Fn(A, B, ..) -> Ret`.
pub trait Handler<Args, Ret>: Send + Sync + 'static {
    const ARITY: usize;

    fn handle(&self, dec: &mut Decoder<'_>) -> Result<Ret, CallError>;
}

/// Methods on a shared receiver, `Fn(&S, A, B, ..) -> Ret`.
pub trait MethodHandler<S, Args, Ret>: Send + Sync + 'static {
    const ARITY: usize;

    fn handle(&self, receiver: &S, dec: &mut Decoder<'_>) -> Result<Ret, CallError>;
}

/// Functions that also want the call context, `Fn(&CallContext, A, B, ..) -> Ret`.
pub trait ContextHandler<Args, Ret>: Send + Sync + 'static {
    const ARITY: usize;

    fn handle(&self, ctx: &CallContext, dec: &mut Decoder<'_>) -> Result<Ret, CallError>;
}

macro_rules! count {
    () => { 0usize };
    ($head:ident $($tail:ident)*) => { 1usize + count!($($tail)*) };
}

macro_rules! impl_handlers {
    ($($arg:ident),*) => {
        impl<$($arg: Pack),*> Arguments for ($($arg,)*) {
            const COUNT: usize = count!($($arg)*);

            #[allow(non_snake_case, unused_variables)]
            fn pack_args(&self, enc: &mut Encoder) -> wirepack::Result<()> {
                let ($($arg,)*) = self;
                $($arg.pack(enc)?;)*
                Ok(())
            }
        }

        impl<Func, Ret, $($arg),*> Handler<($($arg,)*), Ret> for Func
        where
            Func: Fn($($arg),*) -> Ret + Send + Sync + 'static,
            $($arg: Unpack,)*
        {
            const ARITY: usize = count!($($arg)*);

            #[allow(non_snake_case)]
            fn handle(&self, dec: &mut Decoder<'_>) -> Result<Ret, CallError> {
                $(let $arg = $arg::unpack(dec)?;)*
                dec.finish()?;
                Ok((self)($($arg),*))
            }
        }

        impl<S, Func, Ret, $($arg),*> MethodHandler<S, ($($arg,)*), Ret> for Func
        where
            Func: Fn(&S $(, $arg)*) -> Ret + Send + Sync + 'static,
            $($arg: Unpack,)*
        {
            const ARITY: usize = count!($($arg)*);

            #[allow(non_snake_case)]
            fn handle(&self, receiver: &S, dec: &mut Decoder<'_>) -> Result<Ret, CallError> {
                $(let $arg = $arg::unpack(dec)?;)*
                dec.finish()?;
                Ok((self)(receiver $(, $arg)*))
            }
        }

        impl<Func, Ret, $($arg),*> ContextHandler<($($arg,)*), Ret> for Func
        where
            Func: Fn(&CallContext $(, $arg)*) -> Ret + Send + Sync + 'static,
            $($arg: Unpack,)*
        {
            const ARITY: usize = count!($($arg)*);

            #[allow(non_snake_case)]
            fn handle(&self, ctx: &CallContext, dec: &mut Decoder<'_>) -> Result<Ret, CallError> {
                $(let $arg = $arg::unpack(dec)?;)*
                dec.finish()?;
                Ok((self)(ctx $(, $arg)*))
            }
        }
    };
}

impl_handlers!();
impl_handlers!(A1);
impl_handlers!(A1, A2);
impl_handlers!(A1, A2, A3);
impl_handlers!(A1, A2, A3, A4);
impl_handlers!(A1, A2, A3, A4, A5);
impl_handlers!(A1, A2, A3, A4, A5, A6);

type Invoke = dyn Fn(&CallContext, &mut Decoder<'_>) -> Result<Vec<u8>, CallError> + Send + Sync;

/// A callable assembled by one of the adapter functions below.
pub struct Adapted {
    arity: usize,
    invoke: Box<Invoke>,
}

impl Callable for Adapted {
    fn invoke(&self, ctx: &CallContext, params: &[u8]) -> Result<Vec<u8>, CallError> {
        let mut dec = Decoder::new(params);
        std::panic::catch_unwind(AssertUnwindSafe(|| (self.invoke)(ctx, &mut dec)))
            .unwrap_or_else(|payload| {
                let reason = panic_message(payload.as_ref());
                tracing::warn!(
                    protocol = ctx.protocol,
                    function = ctx.function,
                    correlation = ctx.correlation,
                    %reason,
                    "callable panicked"
                );
                Err(CallError::internal(format!("callable panicked: {}", reason)))
            })
    }

    fn arity(&self) -> usize {
        self.arity
    }
}

impl std::fmt::Debug for Adapted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Adapted").field("arity", &self.arity).finish()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn pack_reply<R: Pack>(value: &R) -> Result<Vec<u8>, CallError> {
    wirepack::to_bytes(value)
        .map_err(|e| CallError::internal(format!("could not encode result: {}", e)))
}

fn adapted(arity: usize, invoke: Box<Invoke>) -> Box<dyn Callable> {
    Box::new(Adapted { arity, invoke })
}

/// Adapts an infallible function.
pub fn function<F, Args, R>(f: F) -> Box<dyn Callable>
where
    F: Handler<Args, R>,
    Args: 'static,
    R: Pack + 'static,
{
    let arity = F::ARITY;
    adapted(
        arity,
        Box::new(move |_: &CallContext, dec: &mut Decoder<'_>| pack_reply(&f.handle(dec)?)),
    )
}

/// Adapts a function returning `Result<R, CallError>`; an `Err` travels back
/// to the caller unchanged.
pub fn fallible<F, Args, R>(f: F) -> Box<dyn Callable>
where
    F: Handler<Args, Result<R, CallError>>,
    Args: 'static,
    R: Pack + 'static,
{
    let arity = F::ARITY;
    adapted(
        arity,
        Box::new(move |_: &CallContext, dec: &mut Decoder<'_>| pack_reply(&f.handle(dec)??)),
    )
}

/// Adapts a method bound to a shared receiver.
pub fn method<S, F, Args, R>(receiver: Arc<S>, f: F) -> Box<dyn Callable>
where
    S: Send + Sync + 'static,
    F: MethodHandler<S, Args, R>,
    Args: 'static,
    R: Pack + 'static,
{
    let arity = F::ARITY;
    adapted(
        arity,
        Box::new(move |_: &CallContext, dec: &mut Decoder<'_>| {
            pack_reply(&f.handle(&receiver, dec)?)
        }),
    )
}

pub fn method_fallible<S, F, Args, R>(receiver: Arc<S>, f: F) -> Box<dyn Callable>
where
    S: Send + Sync + 'static,
    F: MethodHandler<S, Args, Result<R, CallError>>,
    Args: 'static,
    R: Pack + 'static,
{
    let arity = F::ARITY;
    adapted(
        arity,
        Box::new(move |_: &CallContext, dec: &mut Decoder<'_>| {
            pack_reply(&f.handle(&receiver, dec)??)
        }),
    )
}

/// Adapts a fallible function that receives the `CallContext` first.
pub fn contextual<F, Args, R>(f: F) -> Box<dyn Callable>
where
    F: ContextHandler<Args, Result<R, CallError>>,
    Args: 'static,
    R: Pack + 'static,
{
    let arity = F::ARITY;
    adapted(
        arity,
        Box::new(move |ctx: &CallContext, dec: &mut Decoder<'_>| pack_reply(&f.handle(ctx, dec)??)),
    )
}
