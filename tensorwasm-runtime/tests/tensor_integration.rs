//! Tensor allocation and host copies against the mock module.

mod common;

use common::*;
use tensorwasm_core::{BridgeError, DataType, DeviceType, HostArray};

#[test]
fn test_tensor_header_is_parsed() {
    let mut instance = instance();
    let device = instance.cpu(0);
    let tensor = instance
        .create_tensor(&[2, 3, 4], "float32", device)
        .expect("Failed to create tensor");

    assert_eq!(tensor.shape(), &[2, 3, 4]);
    assert_eq!(tensor.ndim(), 3);
    assert_eq!(tensor.dtype(), DataType::FLOAT32);
    assert_eq!(tensor.device(), device);
    assert_eq!(tensor.num_elements(), 24);
    assert_eq!(tensor.nbytes(), 96);
    assert_eq!(tensor.byte_offset(), 0);
    assert!(!tensor.is_view());
    assert_ne!(tensor.data_ptr(), 0);
}

#[test]
fn test_host_round_trip_for_every_element_type() {
    let mut instance = instance();
    let device = instance.cpu(0);
    let cases = [
        ("int8", HostArray::Int8(vec![-128, -1, 0, 1, 127])),
        ("uint8", HostArray::UInt8(vec![0, 1, 128, 254, 255])),
        ("int32", HostArray::Int32(vec![i32::MIN, -5, 0, 5, i32::MAX])),
        ("float32", HostArray::Float32(vec![-1.5, 0.0, 0.25, 3.0, f32::MAX])),
        ("float64", HostArray::Float64(vec![-1e300, -0.5, 0.0, 0.5, 1e300])),
    ];

    for (dtype, data) in cases {
        let tensor = instance.create_tensor(&[5], dtype, device).unwrap();
        tensor.copy_from_host(&mut instance, &data).unwrap();
        assert_eq!(tensor.to_host_array(&mut instance).unwrap(), data, "dtype {dtype}");
    }
}

#[test]
fn test_host_values_are_converted_to_tensor_dtype() {
    let mut instance = instance();
    let device = instance.cpu(0);
    let tensor = instance.create_tensor(&[3], "int32", device).unwrap();
    tensor
        .copy_from_host(&mut instance, &HostArray::Float64(vec![1.0, -2.0, 300.0]))
        .unwrap();
    assert_eq!(
        tensor.to_host_array(&mut instance).unwrap(),
        HostArray::Int32(vec![1, -2, 300])
    );
}

#[test]
fn test_raw_bytes_round_trip() {
    let mut instance = instance();
    let device = instance.cpu(0);
    let tensor = instance.create_tensor(&[2, 2], "uint8", device).unwrap();
    tensor.copy_from_raw_bytes(&mut instance, &[4, 3, 2, 1]).unwrap();
    assert_eq!(tensor.to_raw_bytes(&mut instance).unwrap(), vec![4, 3, 2, 1]);
}

#[test]
fn test_element_count_must_match_shape() {
    let mut instance = instance();
    let device = instance.cpu(0);
    let tensor = instance.create_tensor(&[2, 3], "float32", device).unwrap();
    let err = tensor
        .copy_from_host(&mut instance, &HostArray::Float32(vec![0.0; 5]))
        .unwrap_err();
    assert!(matches!(err, BridgeError::ShapeMismatch { expected: 6, actual: 5 }));
}

#[test]
fn test_scalar_tensor_holds_one_element() {
    let mut instance = instance();
    let device = instance.cpu(0);
    let scalar = instance.create_tensor(&[], "float32", device).unwrap();
    assert_eq!(scalar.num_elements(), 1);

    let err = scalar
        .copy_from_host(&mut instance, &HostArray::Float32(Vec::new()))
        .unwrap_err();
    assert!(matches!(err, BridgeError::ShapeMismatch { expected: 1, actual: 0 }));

    scalar
        .copy_from_host(&mut instance, &HostArray::Float32(vec![7.5]))
        .unwrap();
    assert_eq!(
        scalar.to_host_array(&mut instance).unwrap(),
        HostArray::Float32(vec![7.5])
    );
}

#[test]
fn test_byte_length_must_match_storage() {
    let mut instance = instance();
    let device = instance.cpu(0);
    let tensor = instance.create_tensor(&[2], "float32", device).unwrap();
    let err = tensor.copy_from_raw_bytes(&mut instance, &[0u8; 3]).unwrap_err();
    assert!(matches!(err, BridgeError::ByteLengthMismatch { expected: 8, actual: 3 }));
}

#[test]
fn test_invalid_shape_and_dtype_are_rejected_before_allocation() {
    let mut instance = instance();
    let device = instance.cpu(0);
    assert!(matches!(
        instance.create_tensor(&[2, -1], "float32", device),
        Err(BridgeError::InvalidShape { .. })
    ));
    assert!(matches!(
        instance.create_tensor(&[2], "complex64", device),
        Err(BridgeError::UnknownDType { .. })
    ));
    let scratch = instance.scratch_pool_size();
    assert!(matches!(
        instance.create_tensor(&[1 << 40, 1 << 40], "float32", device),
        Err(BridgeError::InvalidShape { .. })
    ));
    assert_eq!(instance.scratch_pool_size(), scratch);
}

#[test]
fn test_tensor_to_tensor_copy() {
    let mut instance = instance();
    let device = instance.cpu(0);
    let src = instance.create_tensor(&[4], "float32", device).unwrap();
    let dst = instance.create_tensor(&[4], "float32", device).unwrap();
    let data = HostArray::Float32(vec![1.0, 2.0, 3.0, 4.0]);
    src.copy_from_host(&mut instance, &data).unwrap();
    dst.copy_from(&mut instance, &src).unwrap();
    assert_eq!(dst.to_host_array(&mut instance).unwrap(), data);

    let small = instance.create_tensor(&[2], "float32", device).unwrap();
    assert!(matches!(
        small.copy_from(&mut instance, &src),
        Err(BridgeError::ModuleError { .. })
    ));
}

#[test]
fn test_async_device_tensor_cannot_be_read_synchronously() {
    let mut instance = instance();
    let gpu = instance.context("webgpu", 0).unwrap();
    assert_eq!(gpu.device_type, DeviceType::WebGpu);
    let tensor = instance.create_tensor(&[2], "float32", gpu).unwrap();
    assert!(matches!(
        tensor.to_host_array(&mut instance),
        Err(BridgeError::UnsupportedDeviceCopy { .. })
    ));
}

#[test]
fn test_unknown_device_name_is_rejected() {
    let instance = instance();
    assert!(matches!(
        instance.context("tpu", 0),
        Err(BridgeError::UnknownDevice { .. })
    ));
}

#[test]
fn test_view_dispose_is_a_no_op() {
    let mut instance = instance();
    let device = instance.cpu(0);
    let tensor = instance.create_tensor(&[3], "int32", device).unwrap();
    let data = HostArray::Int32(vec![7, 8, 9]);
    tensor.copy_from_host(&mut instance, &data).unwrap();

    let mut view = tensor.as_view();
    assert!(view.is_view());
    view.dispose(&mut instance).unwrap();
    assert_eq!(view.handle(), tensor.handle());
    assert_eq!(view.to_host_array(&mut instance).unwrap(), data);
}

#[test]
fn test_disposed_tensor_is_unusable() {
    let mut instance = instance();
    let device = instance.cpu(0);
    let mut tensor = instance.create_tensor(&[3], "int32", device).unwrap();
    tensor.dispose(&mut instance).unwrap();
    assert_eq!(tensor.handle(), 0);
    assert!(matches!(
        tensor.to_raw_bytes(&mut instance),
        Err(BridgeError::UseAfterDispose { .. })
    ));
    tensor.dispose(&mut instance).unwrap();
}

#[test]
fn test_tensor_argument_reaches_host_function_as_view() {
    use std::sync::{Arc, Mutex};
    use tensorwasm_runtime::{Value, host_fn};

    let mut instance = instance();
    let device = instance.cpu(0);
    let tensor = instance.create_tensor(&[2, 2], "float32", device).unwrap();

    let seen = Arc::new(Mutex::new(None));
    let record = Arc::clone(&seen);
    instance
        .register_func(
            "test.inspect",
            host_fn(move |_, args| {
                if let Some(Value::Tensor(t)) = args.first() {
                    *record.lock().unwrap() = Some((t.is_view(), t.shape().to_vec()));
                }
                Ok(Value::Null)
            }),
            false,
        )
        .unwrap();

    let inspect = instance.get_global_func("test.inspect").unwrap();
    inspect.call(&mut instance, &[(&tensor).into()]).unwrap();
    assert_eq!(*seen.lock().unwrap(), Some((true, vec![2, 2])));
}
