pub mod topo_error;

pub use topo_error::TopoError;

pub type TResult<T> = Result<T, TopoError>;
