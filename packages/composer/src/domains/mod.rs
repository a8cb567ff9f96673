// Domain layers - business logic on top of kernel infrastructure

pub mod composes;
