pub mod onnx_modnet_remover;
