mod fixture;
mod real_jvm;
mod serializer;
mod session;
