pub mod onnx_arcface_embedder;
pub mod onnx_blazeface_detector;
pub mod onnx_session;
