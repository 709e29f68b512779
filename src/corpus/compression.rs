//! Single-block brotli compression for corpus values.

use brotli_sys::{
    BrotliDecoderDecompress, BrotliEncoderCompressStream, BrotliEncoderCreateInstance,
    BrotliEncoderDestroyInstance, BrotliEncoderSetParameter, BROTLI_DECODER_RESULT_SUCCESS,
    BROTLI_OPERATION_FINISH, BROTLI_OPERATION_PROCESS, BROTLI_PARAM_QUALITY,
};
use std::{
    io::{Error, ErrorKind, Result},
    ptr,
};

const T2C_BROTLI_LEVEL: u32 = 5;

/// Compresses `data` as one brotli stream.
pub fn compress(data: &[u8]) -> Result<Vec<u8>> {
    // Add slop for incompressible data
    let mut output_buf = vec![0u8; data.len() + data.len() / 10 + 1024];

    unsafe {
        let state = BrotliEncoderCreateInstance(None, None, ptr::null_mut());
        if state.is_null() {
            return Err(Error::new(ErrorKind::Other, "BrotliEncoderCreateInstance failed"));
        }
        if 0 == BrotliEncoderSetParameter(state, BROTLI_PARAM_QUALITY, T2C_BROTLI_LEVEL) {
            BrotliEncoderDestroyInstance(state);
            return Err(Error::new(ErrorKind::Other, "Brotli initialization failed"));
        }

        let mut total_out: usize = 0;
        let mut avail_out: usize = output_buf.len();
        let mut next_out: *mut u8 = output_buf.as_mut_ptr();
        let mut avail_in: usize = data.len();
        let mut next_in: *const u8 = data.as_ptr();
        let mut ok = true;
        while avail_in > 0 {
            if 0 == BrotliEncoderCompressStream(
                state,
                BROTLI_OPERATION_PROCESS,
                &mut avail_in,
                &mut next_in,
                &mut avail_out,
                &mut next_out,
                &mut total_out,
            ) {
                ok = false;
                break;
            }
        }
        let mut zero: usize = 0;
        let mut no_input: *const u8 = ptr::null();
        if ok
            && 0 == BrotliEncoderCompressStream(
                state,
                BROTLI_OPERATION_FINISH,
                &mut zero,
                &mut no_input,
                &mut avail_out,
                &mut next_out,
                &mut total_out,
            )
        {
            ok = false;
        }
        BrotliEncoderDestroyInstance(state);

        if !ok {
            return Err(Error::new(ErrorKind::Other, "Brotli compression failed"));
        }
        output_buf.truncate(total_out);
    }
    Ok(output_buf)
}

/// Inverse of `compress`; `uncompressed_len` must be the exact original length.
pub fn decompress(data: &[u8], uncompressed_len: usize) -> Result<Vec<u8>> {
    let mut out = vec![0u8; uncompressed_len];
    let mut decoded_size = uncompressed_len;
    let result = unsafe {
        BrotliDecoderDecompress(
            data.len(),
            data.as_ptr(),
            &mut decoded_size,
            out.as_mut_ptr(),
        )
    };
    if result != BROTLI_DECODER_RESULT_SUCCESS || decoded_size != uncompressed_len {
        return Err(Error::new(ErrorKind::InvalidData, "Brotli decompression failed"));
    }
    Ok(out)
}
